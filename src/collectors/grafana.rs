//! A collector that polls a Grafana instance: the built-in Alertmanager
//! alerts endpoint unconditionally, and optionally one proxied Prometheus
//! alerts endpoint per configured datasource UID.

use reqwest::header::AUTHORIZATION;
use reqwest_middleware::ClientWithMiddleware;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Collector, CollectorError, CollectorKind, CollectorPayload, send_payload};
use crate::{
    config::{GrafanaCollectorConfig, HttpRetryConfig},
    http_client::retryable_client,
};
use async_trait::async_trait;

/// Path of the Grafana-internal Alertmanager alerts endpoint.
const ALERTMANAGER_ENDPOINT: &str =
    "/api/alertmanager/grafana/api/v2/alerts?active=true&silenced=false&inhibited=true";

/// Polls a Grafana instance for active alerts.
pub struct GrafanaCollector {
    cfg: GrafanaCollectorConfig,
    client: ClientWithMiddleware,
}

impl GrafanaCollector {
    /// Creates a new collector with a retryable HTTP client.
    pub fn new(cfg: GrafanaCollectorConfig, retry: &HttpRetryConfig) -> Self {
        tracing::debug!("Initializing the Grafana collector.");
        Self { cfg, client: retryable_client(retry) }
    }

    /// Fetches one endpoint relative to the configured API base URL.
    async fn fetch(&self, endpoint: &str) -> Result<Vec<u8>, CollectorError> {
        tracing::debug!(endpoint, "Fetching data from Grafana.");

        let response = self
            .client
            .get(format!("{}{}", self.cfg.api_url, endpoint))
            .header(AUTHORIZATION, format!("Bearer {}", self.cfg.token))
            .send()
            .await?;

        let body = response.bytes().await?;

        tracing::debug!(endpoint, data_length = body.len(), "Data fetched from Grafana.");
        Ok(body.to_vec())
    }

    /// Performs one polling cycle: the Alertmanager endpoint, then each
    /// configured Prometheus datasource.
    async fn collect_once(&self, out: &mpsc::Sender<CollectorPayload>) {
        match self.fetch(ALERTMANAGER_ENDPOINT).await {
            Ok(data) => send_payload(out, CollectorKind::GrafanaAlertmanager, data),
            Err(e) => {
                tracing::error!(error = %e, "Failed to fetch data from the Grafana Alertmanager.");
                return;
            }
        }

        if self.cfg.include_prometheus_alerts {
            for uid in &self.cfg.prometheus_uids {
                let endpoint = format!("/api/prometheus/{uid}/api/v1/alerts");
                match self.fetch(&endpoint).await {
                    Ok(data) => send_payload(out, CollectorKind::GrafanaPrometheus, data),
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            uid = %uid,
                            "Failed to fetch data from the Grafana Prometheus."
                        );
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Collector for GrafanaCollector {
    async fn run(&self, token: CancellationToken, out: mpsc::Sender<CollectorPayload>) {
        if !self.cfg.is_active {
            tracing::warn!("Grafana collector is inactive; exiting data collection.");
            return;
        }

        tracing::debug!(
            collect_timeout_secs = self.cfg.collect_timeout.as_secs(),
            "Starting the Grafana data collection."
        );

        let mut ticker = tokio::time::interval(self.cfg.collect_timeout);
        // The first tick completes immediately; consume it so the first fetch
        // happens one full period after startup.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!("Stopping the Grafana data collection.");
                    return;
                }
                _ = ticker.tick() => self.collect_once(&out).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn test_config(api_url: String) -> GrafanaCollectorConfig {
        GrafanaCollectorConfig {
            is_active: true,
            api_url,
            token: "test-token".to_string(),
            include_prometheus_alerts: false,
            prometheus_uids: vec![],
            collect_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_fetch_sends_bearer_token_to_alertmanager_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/alertmanager/grafana/api/v2/alerts")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("active".into(), "true".into()),
                mockito::Matcher::UrlEncoded("silenced".into(), "false".into()),
                mockito::Matcher::UrlEncoded("inhibited".into(), "true".into()),
            ]))
            .match_header("authorization", "Bearer test-token")
            .with_body(r#"[{"annotations":{"summary":"s"},"startsAt":"2024-01-01T00:00:00Z"}]"#)
            .create_async()
            .await;

        let collector =
            GrafanaCollector::new(test_config(server.url()), &HttpRetryConfig::default());

        let body = collector.fetch(ALERTMANAGER_ENDPOINT).await.unwrap();

        mock.assert_async().await;
        assert!(!body.is_empty());
    }

    #[tokio::test]
    async fn test_collect_once_publishes_prometheus_payload_per_uid() {
        let mut server = mockito::Server::new_async().await;
        let am_mock = server
            .mock("GET", "/api/alertmanager/grafana/api/v2/alerts")
            .match_query(mockito::Matcher::Any)
            .with_body("[]")
            .create_async()
            .await;
        let prom_mock = server
            .mock("GET", "/api/prometheus/uid-a/api/v1/alerts")
            .with_body(r#"{"data":{"alerts":[]}}"#)
            .create_async()
            .await;

        let mut cfg = test_config(server.url());
        cfg.include_prometheus_alerts = true;
        cfg.prometheus_uids = vec!["uid-a".to_string()];
        let collector = GrafanaCollector::new(cfg, &HttpRetryConfig::default());

        let (tx, mut rx) = mpsc::channel(4);
        collector.collect_once(&tx).await;

        am_mock.assert_async().await;
        prom_mock.assert_async().await;

        assert_eq!(rx.recv().await.unwrap().kind, CollectorKind::GrafanaAlertmanager);
        assert_eq!(rx.recv().await.unwrap().kind, CollectorKind::GrafanaPrometheus);
    }

    #[tokio::test]
    async fn test_run_returns_immediately_when_inactive() {
        let mut cfg = test_config("http://grafana.invalid".to_string());
        cfg.is_active = false;
        let collector = GrafanaCollector::new(cfg, &HttpRetryConfig::default());

        let (tx, _rx) = mpsc::channel(1);
        // Completes without the token ever being cancelled.
        collector.run(CancellationToken::new(), tx).await;
    }
}

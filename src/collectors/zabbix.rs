//! A collector that polls a Zabbix server for active triggers through its
//! JSON-RPC API.

use reqwest_middleware::ClientWithMiddleware;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Collector, CollectorError, CollectorKind, CollectorPayload, send_payload};
use crate::{
    config::{HttpRetryConfig, ZabbixCollectorConfig},
    http_client::retryable_client,
};
use async_trait::async_trait;

/// Polls a Zabbix server for active, unacknowledged triggers.
pub struct ZabbixCollector {
    cfg: ZabbixCollectorConfig,
    client: ClientWithMiddleware,
}

impl ZabbixCollector {
    /// Creates a new collector with a retryable HTTP client.
    pub fn new(cfg: ZabbixCollectorConfig, retry: &HttpRetryConfig) -> Self {
        tracing::debug!("Initializing the Zabbix collector.");
        Self { cfg, client: retryable_client(retry) }
    }

    /// Issues a `trigger.get` call and returns the raw response body.
    async fn fetch(&self) -> Result<Vec<u8>, CollectorError> {
        tracing::debug!(
            api_url = %self.cfg.api_url,
            trigger_min_level = self.cfg.trigger_min_level,
            "Fetching data from Zabbix."
        );

        let request_payload = json!({
            "jsonrpc": "2.0",
            "method": "trigger.get",
            "params": {
                "only_true": 1,
                "active": 1,
                "withLastEventUnacknowledged": 1,
                "min_severity": self.cfg.trigger_min_level,
                "expandDescription": 1,
                "selectHosts": ["host"],
                "monitored": 1,
                "filter": { "value": 1 },
            },
            "auth": self.cfg.token,
            "id": 1,
        });

        let response = self
            .client
            .post(format!("{}/api_jsonrpc.php", self.cfg.api_url))
            .json(&request_payload)
            .send()
            .await?;

        let body = response.bytes().await?;

        tracing::debug!(data_length = body.len(), "Data fetched from Zabbix.");
        Ok(body.to_vec())
    }
}

#[async_trait]
impl Collector for ZabbixCollector {
    async fn run(&self, token: CancellationToken, out: mpsc::Sender<CollectorPayload>) {
        if !self.cfg.is_active {
            tracing::warn!("Zabbix collector is inactive; exiting data collection.");
            return;
        }

        tracing::debug!(
            collect_timeout_secs = self.cfg.collect_timeout.as_secs(),
            "Starting the Zabbix data collection."
        );

        let mut ticker = tokio::time::interval(self.cfg.collect_timeout);
        // The first tick completes immediately; consume it so the first fetch
        // happens one full period after startup.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!("Stopping the Zabbix data collection.");
                    return;
                }
                _ = ticker.tick() => match self.fetch().await {
                    Ok(data) => send_payload(&out, CollectorKind::Zabbix, data),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to fetch data from Zabbix.");
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn test_config(api_url: String) -> ZabbixCollectorConfig {
        ZabbixCollectorConfig {
            is_active: true,
            api_url,
            token: "zabbix-token".to_string(),
            trigger_min_level: 3,
            collect_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_fetch_issues_trigger_get_rpc_call() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api_jsonrpc.php")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::PartialJson(json!({
                "jsonrpc": "2.0",
                "method": "trigger.get",
                "auth": "zabbix-token",
                "params": { "min_severity": 3, "only_true": 1 },
            })))
            .with_body(r#"{"jsonrpc":"2.0","result":[],"id":1}"#)
            .create_async()
            .await;

        let collector = ZabbixCollector::new(test_config(server.url()), &HttpRetryConfig::default());

        let body = collector.fetch().await.unwrap();

        mock.assert_async().await;
        assert!(!body.is_empty());
    }

    #[tokio::test]
    async fn test_run_returns_immediately_when_inactive() {
        let mut cfg = test_config("http://zabbix.invalid".to_string());
        cfg.is_active = false;
        let collector = ZabbixCollector::new(cfg, &HttpRetryConfig::default());

        let (tx, _rx) = mpsc::channel(1);
        collector.run(CancellationToken::new(), tx).await;
    }
}

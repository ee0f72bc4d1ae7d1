//! The alert parser normalizes raw collector payloads into `Alert`s and
//! aggregates them into batches.
//!
//! The parser is a single cooperative driver over two event sources: payloads
//! arriving from collectors and a periodic flush tick. All buffer mutation
//! happens on this one task. A payload that fails to parse is logged and
//! skipped; the aggregator keeps going.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    collectors::{CollectorKind, CollectorPayload},
    config::{AlertsParserConfig, ParseField},
    models::Alert,
};

/// An error that occurs while normalizing a single collector payload.
#[derive(Debug, Error)]
pub enum ParserError {
    /// The payload was not the JSON document the source kind promises.
    #[error("error decoding payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// An alert carried an unparseable RFC 3339 timestamp.
    #[error("error parsing time for alert: {0}")]
    Timestamp(#[from] chrono::ParseError),

    /// An alert carried an unparseable unix timestamp.
    #[error("invalid unix timestamp '{0}'")]
    UnixTimestamp(String),

    /// A Zabbix trigger carried no host to attribute the alert to.
    #[error("trigger '{0}' has no host attached")]
    MissingHost(String),
}

#[derive(Deserialize)]
struct Annotations {
    summary: Option<String>,
    description: Option<String>,
}

impl Annotations {
    /// Picks the configured annotation field, defaulting to an empty summary
    /// when the annotation is absent.
    fn field(&self, field: ParseField) -> String {
        let value = match field {
            ParseField::Summary => self.summary.as_ref(),
            ParseField::Description => self.description.as_ref(),
        };
        value.cloned().unwrap_or_default()
    }
}

#[derive(Deserialize)]
struct GrafanaAmAlert {
    annotations: Annotations,
    #[serde(rename = "startsAt")]
    starts_at: String,
}

#[derive(Deserialize)]
struct GrafanaPrometheusResponse {
    data: GrafanaPrometheusData,
}

#[derive(Deserialize)]
struct GrafanaPrometheusData {
    alerts: Vec<GrafanaPrometheusAlert>,
}

#[derive(Deserialize)]
struct GrafanaPrometheusAlert {
    annotations: Annotations,
    state: String,
    #[serde(rename = "activeAt")]
    active_at: String,
}

#[derive(Deserialize)]
struct ZabbixResponse {
    result: Vec<ZabbixTrigger>,
}

#[derive(Deserialize)]
struct ZabbixTrigger {
    description: String,
    lastchange: String,
    hosts: Vec<ZabbixHost>,
}

#[derive(Deserialize)]
struct ZabbixHost {
    host: String,
}

/// Normalizes collector payloads into `Alert`s and flushes them downstream in
/// batches on a fixed cadence.
pub struct AlertsParser {
    cfg: AlertsParserConfig,
}

impl AlertsParser {
    /// Creates a new parser.
    pub fn new(cfg: AlertsParserConfig) -> Self {
        tracing::debug!("Initializing the alerts parser.");
        Self { cfg }
    }

    /// Runs the parse-and-aggregate loop until the token is cancelled.
    ///
    /// Alerts accumulate in an internal buffer; on each aggregation tick a
    /// non-empty buffer is published as one batch. If the alerts channel is
    /// full at flush time the flush is skipped and the buffer retained for
    /// the next tick.
    pub async fn run(
        &self,
        token: CancellationToken,
        mut data_rx: mpsc::Receiver<CollectorPayload>,
        alerts_tx: mpsc::Sender<Vec<Alert>>,
    ) {
        tracing::debug!(
            aggregation_interval_secs = self.cfg.aggregation_interval.as_secs(),
            "Starting the alerts parsing and aggregation process."
        );

        let mut ticker = tokio::time::interval(self.cfg.aggregation_interval);
        ticker.tick().await;

        let mut aggregated: Vec<Alert> = Vec::new();

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!("Stopping the alerts parsing and aggregation process.");
                    return;
                }

                Some(payload) = data_rx.recv() => {
                    match self.parse_payload(&payload) {
                        Ok(alerts) => {
                            tracing::debug!(
                                collector_kind = %payload.kind,
                                recently_added = alerts.len(),
                                current_total = aggregated.len() + alerts.len(),
                                "Alerts have been aggregated."
                            );
                            aggregated.extend(alerts);
                        }
                        Err(e) => {
                            tracing::error!(
                                error = %e,
                                collector_kind = %payload.kind,
                                "Failed to parse collector payload; skipping it."
                            );
                        }
                    }
                }

                _ = ticker.tick() => {
                    if aggregated.is_empty() {
                        continue;
                    }
                    match alerts_tx.try_send(std::mem::take(&mut aggregated)) {
                        Ok(()) => {
                            tracing::debug!("Aggregated alerts have been sent to the channel.");
                        }
                        Err(mpsc::error::TrySendError::Full(batch)) => {
                            tracing::warn!(
                                alerts_count = batch.len(),
                                "The alerts channel is full; keeping the batch for the next tick."
                            );
                            aggregated = batch;
                        }
                        Err(mpsc::error::TrySendError::Closed(batch)) => {
                            tracing::warn!(
                                alerts_count = batch.len(),
                                "The alerts channel is closed; keeping the batch."
                            );
                            aggregated = batch;
                        }
                    }
                }
            }
        }
    }

    /// Dispatches a payload to the parser for its source kind.
    fn parse_payload(&self, payload: &CollectorPayload) -> Result<Vec<Alert>, ParserError> {
        match payload.kind {
            CollectorKind::GrafanaAlertmanager => self.parse_grafana_am_alerts(&payload.data),
            CollectorKind::GrafanaPrometheus => self.parse_grafana_prometheus_alerts(&payload.data),
            CollectorKind::Zabbix => parse_zabbix_alerts(&payload.data),
        }
    }

    /// Parses a Grafana Alertmanager response: one alert per array element.
    fn parse_grafana_am_alerts(&self, data: &[u8]) -> Result<Vec<Alert>, ParserError> {
        let response: Vec<GrafanaAmAlert> = serde_json::from_slice(data)?;

        let mut alerts = Vec::with_capacity(response.len());
        for entry in response {
            let starts_at = DateTime::parse_from_rfc3339(&entry.starts_at)?;
            alerts.push(Alert::new(
                entry.annotations.field(self.cfg.grafana_am_parse_field),
                starts_at.with_timezone(&Utc),
            ));
        }

        tracing::debug!(
            alerts_count = alerts.len(),
            "Grafana Alertmanager alerts have been parsed."
        );
        Ok(alerts)
    }

    /// Parses a Grafana Prometheus response, keeping only firing alerts.
    fn parse_grafana_prometheus_alerts(&self, data: &[u8]) -> Result<Vec<Alert>, ParserError> {
        let response: GrafanaPrometheusResponse = serde_json::from_slice(data)?;

        let mut alerts = Vec::new();
        for entry in response.data.alerts {
            if entry.state != "firing" {
                continue;
            }
            let active_at = DateTime::parse_from_rfc3339(&entry.active_at)?;
            alerts.push(Alert::new(
                entry.annotations.field(self.cfg.grafana_prometheus_parse_field),
                active_at.with_timezone(&Utc),
            ));
        }

        tracing::debug!(
            alerts_count = alerts.len(),
            "Grafana Prometheus alerts have been parsed."
        );
        Ok(alerts)
    }
}

/// Parses a Zabbix `trigger.get` response. The summary takes the form
/// `[<host>] <description>` using the trigger's first host.
fn parse_zabbix_alerts(data: &[u8]) -> Result<Vec<Alert>, ParserError> {
    let response: ZabbixResponse = serde_json::from_slice(data)?;

    let mut alerts = Vec::with_capacity(response.result.len());
    for trigger in response.result {
        let secs: i64 = trigger
            .lastchange
            .parse()
            .map_err(|_| ParserError::UnixTimestamp(trigger.lastchange.clone()))?;
        let last_change = DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| ParserError::UnixTimestamp(trigger.lastchange.clone()))?;
        let host = trigger
            .hosts
            .first()
            .ok_or_else(|| ParserError::MissingHost(trigger.description.clone()))?;

        alerts.push(Alert::new(format!("[{}] {}", host.host, trigger.description), last_change));
    }

    tracing::debug!(alerts_count = alerts.len(), "Zabbix alerts have been parsed.");
    Ok(alerts)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn parser(am_field: ParseField, prometheus_field: ParseField) -> AlertsParser {
        AlertsParser::new(AlertsParserConfig {
            aggregation_interval: Duration::from_millis(50),
            grafana_am_parse_field: am_field,
            grafana_prometheus_parse_field: prometheus_field,
        })
    }

    #[test]
    fn test_parse_grafana_am_alerts_reads_configured_field() {
        let data = br#"[
            {"annotations":{"summary":"disk full","description":"long text"},"startsAt":"2024-05-01T10:00:00Z"},
            {"annotations":{"description":"only description"},"startsAt":"2024-05-01T11:00:00+03:00"}
        ]"#;

        let by_summary = parser(ParseField::Summary, ParseField::Summary)
            .parse_grafana_am_alerts(data)
            .unwrap();
        assert_eq!(by_summary.len(), 2);
        assert_eq!(by_summary[0].summary, "disk full");
        // Missing summary annotation falls back to an empty string.
        assert_eq!(by_summary[1].summary, "");
        assert_eq!(by_summary[0].created_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
        // Offsets are normalized to UTC.
        assert_eq!(by_summary[1].created_at.to_rfc3339(), "2024-05-01T08:00:00+00:00");

        let by_description = parser(ParseField::Description, ParseField::Summary)
            .parse_grafana_am_alerts(data)
            .unwrap();
        assert_eq!(by_description[0].summary, "long text");
        assert_eq!(by_description[1].summary, "only description");
    }

    #[test]
    fn test_parse_grafana_am_alerts_rejects_bad_timestamp() {
        let data = br#"[{"annotations":{"summary":"s"},"startsAt":"yesterday"}]"#;
        let result = parser(ParseField::Summary, ParseField::Summary).parse_grafana_am_alerts(data);
        assert!(matches!(result, Err(ParserError::Timestamp(_))));
    }

    #[test]
    fn test_parse_grafana_prometheus_alerts_keeps_only_firing() {
        let data = br#"{"data":{"alerts":[
            {"annotations":{"summary":"db slow"},"state":"firing","activeAt":"2024-05-01T10:00:00Z"},
            {"annotations":{"summary":"pending thing"},"state":"pending","activeAt":"2024-05-01T10:00:00Z"}
        ]}}"#;

        let alerts = parser(ParseField::Summary, ParseField::Summary)
            .parse_grafana_prometheus_alerts(data)
            .unwrap();

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].summary, "db slow");
    }

    #[test]
    fn test_parse_zabbix_alerts_formats_host_and_unix_time() {
        let data = br#"{"result":[
            {"description":"High CPU","lastchange":"1714557600","hosts":[{"host":"web-1"},{"host":"web-2"}]}
        ]}"#;

        let alerts = parse_zabbix_alerts(data).unwrap();

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].summary, "[web-1] High CPU");
        assert_eq!(alerts[0].created_at, DateTime::from_timestamp(1_714_557_600, 0).unwrap());
    }

    #[test]
    fn test_parse_zabbix_alerts_rejects_bad_lastchange() {
        let data = br#"{"result":[{"description":"d","lastchange":"soon","hosts":[{"host":"h"}]}]}"#;
        assert!(matches!(parse_zabbix_alerts(data), Err(ParserError::UnixTimestamp(_))));
    }

    #[test]
    fn test_parse_zabbix_alerts_rejects_hostless_trigger() {
        let data = br#"{"result":[{"description":"d","lastchange":"1714557600","hosts":[]}]}"#;
        assert!(matches!(parse_zabbix_alerts(data), Err(ParserError::MissingHost(_))));
    }

    #[tokio::test]
    async fn test_run_flushes_buffer_as_single_batch() {
        let parser = parser(ParseField::Summary, ParseField::Summary);
        let token = CancellationToken::new();
        let (data_tx, data_rx) = mpsc::channel(8);
        let (alerts_tx, mut alerts_rx) = mpsc::channel(8);

        let run_token = token.clone();
        let handle = tokio::spawn(async move { parser.run(run_token, data_rx, alerts_tx).await });

        data_tx
            .send(CollectorPayload {
                kind: CollectorKind::GrafanaAlertmanager,
                data: br#"[{"annotations":{"summary":"a"},"startsAt":"2024-05-01T10:00:00Z"},
                           {"annotations":{"summary":"b"},"startsAt":"2024-05-01T10:01:00Z"}]"#
                    .to_vec(),
            })
            .await
            .unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(2), alerts_rx.recv())
            .await
            .expect("expected a flushed batch")
            .unwrap();
        assert_eq!(batch.len(), 2);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_skips_bad_payload_and_continues() {
        let parser = parser(ParseField::Summary, ParseField::Summary);
        let token = CancellationToken::new();
        let (data_tx, data_rx) = mpsc::channel(8);
        let (alerts_tx, mut alerts_rx) = mpsc::channel(8);

        let run_token = token.clone();
        let handle = tokio::spawn(async move { parser.run(run_token, data_rx, alerts_tx).await });

        data_tx
            .send(CollectorPayload {
                kind: CollectorKind::GrafanaAlertmanager,
                data: b"not json".to_vec(),
            })
            .await
            .unwrap();
        data_tx
            .send(CollectorPayload {
                kind: CollectorKind::Zabbix,
                data: br#"{"result":[{"description":"d","lastchange":"1714557600","hosts":[{"host":"h"}]}]}"#
                    .to_vec(),
            })
            .await
            .unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(2), alerts_rx.recv())
            .await
            .expect("expected a flushed batch")
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].summary, "[h] d");

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_retains_buffer_when_alerts_channel_full() {
        let parser = parser(ParseField::Summary, ParseField::Summary);
        let token = CancellationToken::new();
        let (data_tx, data_rx) = mpsc::channel(8);
        let (alerts_tx, mut alerts_rx) = mpsc::channel(1);

        // Occupy the only slot so the first flush attempt finds the channel
        // full.
        alerts_tx.send(vec![]).await.unwrap();

        let run_token = token.clone();
        let handle = tokio::spawn(async move { parser.run(run_token, data_rx, alerts_tx).await });

        data_tx
            .send(CollectorPayload {
                kind: CollectorKind::GrafanaAlertmanager,
                data: br#"[{"annotations":{"summary":"a"},"startsAt":"2024-05-01T10:00:00Z"}]"#
                    .to_vec(),
            })
            .await
            .unwrap();

        // Give the parser time to hit at least one blocked flush, then drain.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(alerts_rx.recv().await.unwrap(), vec![]);

        let batch = tokio::time::timeout(Duration::from_secs(2), alerts_rx.recv())
            .await
            .expect("expected the retained batch")
            .unwrap();
        assert_eq!(batch.len(), 1);

        token.cancel();
        handle.await.unwrap();
    }
}

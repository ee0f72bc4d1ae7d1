//! Collectors periodically poll heterogeneous upstream monitoring sources
//! and publish the raw payloads downstream for parsing.
//!
//! Each payload is tagged with the kind of source it came from; the parser
//! switches on that tag. Adding a new source means defining a kind tag,
//! adding a parser branch, implementing the `Collector` trait, and wiring
//! the new collector into the supervisor.

use std::fmt;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub mod grafana;
pub mod zabbix;

pub use grafana::GrafanaCollector;
pub use zabbix::ZabbixCollector;

/// Identifies which upstream source produced a raw payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectorKind {
    /// The Grafana Alertmanager alerts endpoint.
    GrafanaAlertmanager,
    /// A Grafana-proxied Prometheus alerts endpoint.
    GrafanaPrometheus,
    /// The Zabbix JSON-RPC trigger endpoint.
    Zabbix,
}

impl CollectorKind {
    /// Returns the canonical name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GrafanaAlertmanager => "grafana_alertmanager",
            Self::GrafanaPrometheus => "grafana_prometheus",
            Self::Zabbix => "zabbix",
        }
    }
}

impl fmt::Display for CollectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw upstream response, tagged with the source it came from.
#[derive(Debug, Clone)]
pub struct CollectorPayload {
    /// Which upstream produced the payload.
    pub kind: CollectorKind,
    /// The raw response body.
    pub data: Vec<u8>,
}

/// An error that occurs while fetching data from an upstream source.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// The request failed to execute, including after retries.
    #[error("failed to execute request: {0}")]
    Request(#[from] reqwest_middleware::Error),

    /// The response body could not be read.
    #[error("failed to read response body: {0}")]
    Body(#[from] reqwest::Error),

    /// The request payload could not be serialized.
    #[error("failed to serialize request payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// A periodic poller for one upstream monitoring source.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Collector: Send + Sync {
    /// Runs the collection loop until the token is cancelled, publishing raw
    /// payloads to `out`. An inactive collector returns immediately.
    async fn run(&self, token: CancellationToken, out: mpsc::Sender<CollectorPayload>);
}

/// Publishes a payload without blocking. Backpressure is shed here: if the
/// channel is full the payload is dropped and a warning logged, keeping the
/// collector on schedule.
pub(crate) fn send_payload(
    out: &mpsc::Sender<CollectorPayload>,
    kind: CollectorKind,
    data: Vec<u8>,
) {
    match out.try_send(CollectorPayload { kind, data }) {
        Ok(()) => {
            tracing::debug!(collector_kind = %kind, "Payload sent to the data channel.");
        }
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!(
                collector_kind = %kind,
                "The data channel is full; dropping payload."
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::warn!(
                collector_kind = %kind,
                "The data channel is closed; dropping payload."
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_payload_delivers_when_capacity_available() {
        let (tx, mut rx) = mpsc::channel(1);

        send_payload(&tx, CollectorKind::Zabbix, b"payload".to_vec());

        let payload = rx.recv().await.unwrap();
        assert_eq!(payload.kind, CollectorKind::Zabbix);
        assert_eq!(payload.data, b"payload");
    }

    #[tokio::test]
    async fn test_send_payload_drops_when_channel_full() {
        let (tx, mut rx) = mpsc::channel(1);

        send_payload(&tx, CollectorKind::Zabbix, b"first".to_vec());
        send_payload(&tx, CollectorKind::Zabbix, b"second".to_vec());

        assert_eq!(rx.recv().await.unwrap().data, b"first");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_collector_kind_names() {
        assert_eq!(CollectorKind::GrafanaAlertmanager.as_str(), "grafana_alertmanager");
        assert_eq!(CollectorKind::GrafanaPrometheus.as_str(), "grafana_prometheus");
        assert_eq!(CollectorKind::Zabbix.as_str(), "zabbix");
    }
}

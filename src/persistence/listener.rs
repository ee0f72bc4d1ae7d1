//! The notification listener subscribes to a store change channel and
//! delivers `(action, id)` events to a handler.
//!
//! The subscription loop reconnects after any transport failure with a fixed
//! backoff. Delivery is at-most-once: events may be missed across
//! reconnects, so handlers must be idempotent and the caches are fully
//! repopulated from the store at startup.

use std::{future::Future, str::FromStr, time::Duration};

use sqlx::{PgPool, postgres::PgListener};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// How long to wait before re-establishing a failed subscription.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(10);

/// Store channels carrying change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenChannel {
    /// Changes to the incidents table.
    Incidents,
    /// Changes to the rules table.
    Rules,
}

impl ListenChannel {
    /// Returns the Postgres channel name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incidents => "a2i_incidents_channel",
            Self::Rules => "a2i_rules_channel",
        }
    }
}

/// The mutation a change notification describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    /// A row was inserted.
    Insert,
    /// A row was updated.
    Update,
    /// A row was deleted.
    Delete,
}

/// An error that occurs while decoding a notification payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    /// The payload did not take the `<ACTION>:<id>` form.
    #[error("invalid notification payload '{0}'")]
    Malformed(String),

    /// The payload named an action the listener does not know.
    #[error("unknown notification action '{0}'")]
    UnknownAction(String),
}

impl FromStr for ChangeAction {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            other => Err(PayloadError::UnknownAction(other.to_string())),
        }
    }
}

/// A decoded change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// The mutation that happened.
    pub action: ChangeAction,
    /// Primary key of the affected row.
    pub id: String,
}

/// Decodes a `"<ACTION>:<id>"` notification payload.
pub fn parse_change_payload(payload: &str) -> Result<ChangeEvent, PayloadError> {
    let (action, id) = payload
        .split_once(':')
        .ok_or_else(|| PayloadError::Malformed(payload.to_string()))?;

    if id.is_empty() {
        return Err(PayloadError::Malformed(payload.to_string()));
    }

    Ok(ChangeEvent { action: action.parse()?, id: id.to_string() })
}

/// Listens for change notifications on a store channel and invokes the
/// handler for each decoded event, until the token is cancelled.
///
/// Any transport failure tears the subscription down and re-establishes it
/// after [`RECONNECT_BACKOFF`]. Malformed payloads are logged and skipped.
pub async fn listen_for_changes<F, Fut>(
    token: CancellationToken,
    pool: PgPool,
    channel: ListenChannel,
    mut handler: F,
) where
    F: FnMut(ChangeEvent) -> Fut,
    Fut: Future<Output = ()>,
{
    tracing::debug!(channel = channel.as_str(), "Starting the notification listener.");

    loop {
        let mut listener = match PgListener::connect_with(&pool).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    channel = channel.as_str(),
                    "Failed to open a listener connection; will retry."
                );
                if wait_backoff(&token).await {
                    return;
                }
                continue;
            }
        };

        if let Err(e) = listener.listen(channel.as_str()).await {
            tracing::error!(
                error = %e,
                channel = channel.as_str(),
                "Failed to listen to the channel; will retry."
            );
            if wait_backoff(&token).await {
                return;
            }
            continue;
        }

        tracing::debug!(
            channel = channel.as_str(),
            "Notification listener has successfully started."
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(
                        channel = channel.as_str(),
                        "Stopping the notification listener."
                    );
                    return;
                }
                received = listener.recv() => match received {
                    Ok(notification) => {
                        tracing::debug!(
                            channel = channel.as_str(),
                            payload = notification.payload(),
                            "New notification received; invoking handler."
                        );
                        match parse_change_payload(notification.payload()) {
                            Ok(event) => handler(event).await,
                            Err(e) => {
                                tracing::warn!(
                                    error = %e,
                                    channel = channel.as_str(),
                                    "Skipping undecodable notification."
                                );
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            channel = channel.as_str(),
                            "Failed to wait for a notification; will reconnect."
                        );
                        break;
                    }
                }
            }
        }

        if wait_backoff(&token).await {
            return;
        }
    }
}

/// Sleeps out the reconnect backoff. Returns `true` when the token was
/// cancelled while waiting.
async fn wait_backoff(token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = tokio::time::sleep(RECONNECT_BACKOFF) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_change_payload_decodes_actions() {
        assert_eq!(
            parse_change_payload("INSERT:abc"),
            Ok(ChangeEvent { action: ChangeAction::Insert, id: "abc".to_string() })
        );
        assert_eq!(
            parse_change_payload("UPDATE:abc"),
            Ok(ChangeEvent { action: ChangeAction::Update, id: "abc".to_string() })
        );
        assert_eq!(
            parse_change_payload("DELETE:abc"),
            Ok(ChangeEvent { action: ChangeAction::Delete, id: "abc".to_string() })
        );
    }

    #[test]
    fn test_parse_change_payload_keeps_colons_in_id() {
        let event = parse_change_payload("INSERT:id:with:colons").unwrap();
        assert_eq!(event.id, "id:with:colons");
    }

    #[test]
    fn test_parse_change_payload_rejects_malformed_input() {
        assert!(matches!(parse_change_payload("INSERT"), Err(PayloadError::Malformed(_))));
        assert!(matches!(parse_change_payload("INSERT:"), Err(PayloadError::Malformed(_))));
        assert!(matches!(
            parse_change_payload("TRUNCATE:abc"),
            Err(PayloadError::UnknownAction(_))
        ));
    }

    #[test]
    fn test_channel_names() {
        assert_eq!(ListenChannel::Incidents.as_str(), "a2i_incidents_channel");
        assert_eq!(ListenChannel::Rules.as_str(), "a2i_rules_channel");
    }
}

//! This module defines the `Alert` structure, a normalized event produced by
//! the alert parser from raw collector payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A normalized monitoring event.
///
/// Alerts are ephemeral: they only live inside the aggregation window and the
/// matcher, and are serialized into an incident's `alerts_data` blob when a
/// rule fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Human-readable description of the event.
    pub summary: String,

    /// Time the event was raised at the source, normalized to UTC.
    pub created_at: DateTime<Utc>,
}

impl Alert {
    /// Creates a new alert.
    pub fn new(summary: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self { summary: summary.into(), created_at }
    }
}

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{
    deserialize_duration_from_ms, deserialize_duration_from_seconds, serialize_duration_to_ms,
    serialize_duration_to_seconds,
};

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base() -> u32 {
    2
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(250)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(10)
}

/// Jitter applied to retry backoff delays.
#[derive(Default, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JitterSetting {
    /// Backoff delays are used as computed.
    None,
    /// Backoff delays are randomized across their full range.
    #[default]
    Full,
}

/// Retry policy for the collectors' upstream HTTP requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct HttpRetryConfig {
    /// How many times a transiently failing request is retried.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base of the exponential backoff curve.
    #[serde(default = "default_backoff_base")]
    pub backoff_base: u32,

    /// Delay before the first retry, in milliseconds.
    #[serde(
        default = "default_initial_backoff",
        deserialize_with = "deserialize_duration_from_ms",
        serialize_with = "serialize_duration_to_ms"
    )]
    pub initial_backoff: Duration,

    /// Ceiling on the backoff delay, in whole seconds.
    #[serde(
        default = "default_max_backoff",
        deserialize_with = "deserialize_duration_from_seconds",
        serialize_with = "serialize_duration_to_seconds"
    )]
    pub max_backoff: Duration,

    /// Jitter applied to every delay.
    #[serde(default)]
    pub jitter: JitterSetting,
}

impl Default for HttpRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base: default_backoff_base(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            jitter: JitterSetting::default(),
        }
    }
}

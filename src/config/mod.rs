//! Configuration module for a2i. All settings are loaded from environment
//! variables, grouped by prefix (`DATABASE_*`, `SERVICE_*`).

mod database;
mod helpers;
mod http_retry;
mod service;

pub use database::DatabaseConfig;
pub use helpers::{
    deserialize_duration_from_ms, deserialize_duration_from_seconds,
    deserialize_duration_vec_from_seconds, deserialize_string_list, serialize_duration_to_ms,
    serialize_duration_to_seconds, serialize_duration_vec_to_seconds,
};
pub use http_retry::{HttpRetryConfig, JitterSetting};
pub use service::{
    AlertsParserConfig, GrafanaCollectorConfig, ParseField, ServiceConfig, ZabbixCollectorConfig,
};

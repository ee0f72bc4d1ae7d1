use std::time::Duration;

use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use url::Url;

use super::{deserialize_duration_from_seconds, deserialize_string_list};

/// The smallest allowed polling cadence for collectors.
const MIN_COLLECT_TIMEOUT: Duration = Duration::from_secs(5);

/// The smallest allowed flush cadence for the alert aggregator.
const MIN_AGGREGATION_INTERVAL: Duration = Duration::from_secs(5);

/// Which annotation field the parser reads a summary from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseField {
    /// Read the `summary` annotation.
    Summary,
    /// Read the `description` annotation.
    Description,
}

/// Settings for the Grafana collector, loaded from the
/// `SERVICE_COLLECTOR_GRAFANA_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct GrafanaCollectorConfig {
    /// Whether the collector runs at all.
    #[serde(default)]
    pub is_active: bool,

    /// Base URL of the Grafana instance, without a trailing slash.
    #[serde(default)]
    pub api_url: String,

    /// Bearer token for the Grafana API.
    #[serde(default)]
    pub token: String,

    /// Whether to additionally poll per-datasource Prometheus alerts.
    #[serde(default)]
    pub include_prometheus_alerts: bool,

    /// Prometheus datasource UIDs to poll when
    /// `include_prometheus_alerts` is set.
    #[serde(default, deserialize_with = "deserialize_string_list")]
    pub prometheus_uids: Vec<String>,

    /// Polling cadence, in whole seconds.
    #[serde(default, deserialize_with = "deserialize_duration_from_seconds")]
    pub collect_timeout: Duration,
}

impl GrafanaCollectorConfig {
    /// Validates the settings; inactive collectors are accepted as-is.
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.is_active {
            return Ok(());
        }
        Url::parse(&self.api_url).map_err(|e| {
            ConfigError::Message(format!("SERVICE_COLLECTOR_GRAFANA_API_URL is invalid: {e}"))
        })?;
        if self.token.is_empty() {
            return Err(ConfigError::Message(
                "SERVICE_COLLECTOR_GRAFANA_TOKEN must not be empty".into(),
            ));
        }
        if self.collect_timeout < MIN_COLLECT_TIMEOUT {
            return Err(ConfigError::Message(format!(
                "SERVICE_COLLECTOR_GRAFANA_COLLECT_TIMEOUT must be at least {} seconds",
                MIN_COLLECT_TIMEOUT.as_secs()
            )));
        }
        if self.include_prometheus_alerts && self.prometheus_uids.is_empty() {
            return Err(ConfigError::Message(
                "SERVICE_COLLECTOR_GRAFANA_PROMETHEUS_UIDS must list at least one UID".into(),
            ));
        }
        Ok(())
    }
}

/// Settings for the Zabbix collector, loaded from the
/// `SERVICE_COLLECTOR_ZABBIX_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct ZabbixCollectorConfig {
    /// Whether the collector runs at all.
    #[serde(default)]
    pub is_active: bool,

    /// Base URL of the Zabbix instance, without a trailing slash.
    #[serde(default)]
    pub api_url: String,

    /// Auth token for the Zabbix JSON-RPC API.
    #[serde(default)]
    pub token: String,

    /// Minimum trigger severity to fetch (1..=5).
    #[serde(default)]
    pub trigger_min_level: u8,

    /// Polling cadence, in whole seconds.
    #[serde(default, deserialize_with = "deserialize_duration_from_seconds")]
    pub collect_timeout: Duration,
}

impl ZabbixCollectorConfig {
    /// Validates the settings; inactive collectors are accepted as-is.
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.is_active {
            return Ok(());
        }
        Url::parse(&self.api_url).map_err(|e| {
            ConfigError::Message(format!("SERVICE_COLLECTOR_ZABBIX_API_URL is invalid: {e}"))
        })?;
        if self.token.is_empty() {
            return Err(ConfigError::Message(
                "SERVICE_COLLECTOR_ZABBIX_TOKEN must not be empty".into(),
            ));
        }
        if !(1..=5).contains(&self.trigger_min_level) {
            return Err(ConfigError::Message(
                "SERVICE_COLLECTOR_ZABBIX_TRIGGER_MIN_LEVEL must be between 1 and 5".into(),
            ));
        }
        if self.collect_timeout < MIN_COLLECT_TIMEOUT {
            return Err(ConfigError::Message(format!(
                "SERVICE_COLLECTOR_ZABBIX_COLLECT_TIMEOUT must be at least {} seconds",
                MIN_COLLECT_TIMEOUT.as_secs()
            )));
        }
        Ok(())
    }
}

/// Settings for the alert parser, loaded from the `SERVICE_PARSER_*`
/// environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertsParserConfig {
    /// How often the aggregation buffer is flushed downstream, in whole
    /// seconds.
    #[serde(deserialize_with = "deserialize_duration_from_seconds")]
    pub aggregation_interval: Duration,

    /// Which annotation field to read from Grafana Alertmanager alerts.
    pub grafana_am_parse_field: ParseField,

    /// Which annotation field to read from Grafana Prometheus alerts.
    pub grafana_prometheus_parse_field: ParseField,
}

impl AlertsParserConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.aggregation_interval < MIN_AGGREGATION_INTERVAL {
            return Err(ConfigError::Message(format!(
                "SERVICE_PARSER_AGGREGATION_INTERVAL must be at least {} seconds",
                MIN_AGGREGATION_INTERVAL.as_secs()
            )));
        }
        Ok(())
    }
}

/// Channel and cache sizing loaded from the flat `SERVICE_*` variables.
#[derive(Debug, Deserialize)]
struct ServiceSettings {
    channel_data_max_size: usize,
    channel_alerts_max_size: usize,
    cache_incidents_max_size: i64,
    cache_rules_max_size: i64,
}

/// The full service configuration: channel and cache sizing plus the
/// collector and parser settings.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Capacity of the collectors → parser channel.
    pub channel_data_max_size: usize,

    /// Capacity of the parser → engine channel.
    pub channel_alerts_max_size: usize,

    /// Capacity of the incidents cache.
    pub cache_incidents_max_size: i64,

    /// Capacity of the rules cache; non-positive means unbounded.
    pub cache_rules_max_size: i64,

    /// Grafana collector settings.
    pub grafana_collector: GrafanaCollectorConfig,

    /// Zabbix collector settings.
    pub zabbix_collector: ZabbixCollectorConfig,

    /// Alert parser settings.
    pub alerts_parser: AlertsParserConfig,
}

impl ServiceConfig {
    /// Loads the service configuration from `SERVICE_*` environment variables
    /// and validates it.
    pub fn load() -> Result<Self, ConfigError> {
        let settings: ServiceSettings = Config::builder()
            .add_source(Environment::with_prefix("SERVICE"))
            .build()?
            .try_deserialize()?;

        let grafana_collector: GrafanaCollectorConfig = Config::builder()
            .add_source(Environment::with_prefix("SERVICE_COLLECTOR_GRAFANA"))
            .build()?
            .try_deserialize()?;

        let zabbix_collector: ZabbixCollectorConfig = Config::builder()
            .add_source(Environment::with_prefix("SERVICE_COLLECTOR_ZABBIX"))
            .build()?
            .try_deserialize()?;

        let alerts_parser: AlertsParserConfig = Config::builder()
            .add_source(Environment::with_prefix("SERVICE_PARSER"))
            .build()?
            .try_deserialize()?;

        let cfg = ServiceConfig {
            channel_data_max_size: settings.channel_data_max_size,
            channel_alerts_max_size: settings.channel_alerts_max_size,
            cache_incidents_max_size: settings.cache_incidents_max_size,
            cache_rules_max_size: settings.cache_rules_max_size,
            grafana_collector,
            zabbix_collector,
            alerts_parser,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates the loaded settings, including every sub-config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.channel_data_max_size) {
            return Err(ConfigError::Message(
                "SERVICE_CHANNEL_DATA_MAX_SIZE must be between 1 and 100".into(),
            ));
        }
        if !(1..=100).contains(&self.channel_alerts_max_size) {
            return Err(ConfigError::Message(
                "SERVICE_CHANNEL_ALERTS_MAX_SIZE must be between 1 and 100".into(),
            ));
        }
        if !(1..=100).contains(&self.cache_incidents_max_size) {
            return Err(ConfigError::Message(
                "SERVICE_CACHE_INCIDENTS_MAX_SIZE must be between 1 and 100".into(),
            ));
        }
        if !(-1..=100).contains(&self.cache_rules_max_size) {
            return Err(ConfigError::Message(
                "SERVICE_CACHE_RULES_MAX_SIZE must be between -1 and 100".into(),
            ));
        }
        if !self.grafana_collector.is_active && !self.zabbix_collector.is_active {
            return Err(ConfigError::Message(
                "at least one of the collectors must be active".into(),
            ));
        }
        self.grafana_collector.validate()?;
        self.zabbix_collector.validate()?;
        self.alerts_parser.validate()?;
        Ok(())
    }
}

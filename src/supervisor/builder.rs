//! This module provides the `SupervisorBuilder` for constructing a
//! `Supervisor`.

use std::sync::Arc;

use super::{Supervisor, SupervisorError};
use crate::{
    cache::Cache,
    collectors::{Collector, GrafanaCollector, ZabbixCollector},
    config::{DatabaseConfig, HttpRetryConfig, ServiceConfig},
    engine::IncidentManager,
    parser::AlertsParser,
    persistence::{
        PostgresStateRepository,
        traits::{IncidentsRepository, RulesRepository},
    },
};

/// A builder for creating a `Supervisor` instance.
#[derive(Default)]
pub struct SupervisorBuilder {
    database_config: Option<DatabaseConfig>,
    service_config: Option<ServiceConfig>,
    http_retry_config: HttpRetryConfig,
}

impl SupervisorBuilder {
    /// Creates a new, empty `SupervisorBuilder`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the database configuration for the `Supervisor`.
    pub fn database_config(mut self, config: DatabaseConfig) -> Self {
        self.database_config = Some(config);
        self
    }

    /// Sets the service configuration for the `Supervisor`.
    pub fn service_config(mut self, config: ServiceConfig) -> Self {
        self.service_config = Some(config);
        self
    }

    /// Overrides the HTTP retry policy used by the collectors.
    pub fn http_retry_config(mut self, config: HttpRetryConfig) -> Self {
        self.http_retry_config = config;
        self
    }

    /// Assembles and validates the components to build a `Supervisor`.
    ///
    /// This method performs the final wiring of the application's services:
    /// it connects the database pool, runs migrations, and constructs the
    /// caches, collectors, parser and incident manager.
    pub async fn build(self) -> Result<Supervisor, SupervisorError> {
        let database_config =
            self.database_config.ok_or(SupervisorError::MissingDatabaseConfig)?;
        let service_config = self.service_config.ok_or(SupervisorError::MissingServiceConfig)?;

        let state = Arc::new(PostgresStateRepository::new(&database_config).await?);
        state.run_migrations().await?;

        let rules_repo: Arc<dyn RulesRepository> = state.clone();
        let incidents_repo: Arc<dyn IncidentsRepository> = state.clone();

        let rules_cache = Arc::new(Cache::new(service_config.cache_rules_max_size, "rules"));
        let incidents_cache =
            Arc::new(Cache::new(service_config.cache_incidents_max_size, "incidents"));

        let collectors: Vec<Box<dyn Collector>> = vec![
            Box::new(GrafanaCollector::new(
                service_config.grafana_collector.clone(),
                &self.http_retry_config,
            )),
            Box::new(ZabbixCollector::new(
                service_config.zabbix_collector.clone(),
                &self.http_retry_config,
            )),
        ];

        let parser = AlertsParser::new(service_config.alerts_parser.clone());

        let manager = Arc::new(IncidentManager::new(
            Arc::clone(&rules_repo),
            Arc::clone(&incidents_repo),
            Arc::clone(&rules_cache),
            Arc::clone(&incidents_cache),
        ));

        Ok(Supervisor {
            service_config,
            state,
            rules_repo,
            incidents_repo,
            rules_cache,
            incidents_cache,
            collectors,
            parser,
            manager,
            cancellation_token: tokio_util::sync::CancellationToken::new(),
            join_set: tokio::task::JoinSet::new(),
        })
    }
}

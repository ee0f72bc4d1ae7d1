//! The Supervisor module manages the lifecycle of the a2i pipeline.
//!
//! It acts as the top-level owner of all major components: the collectors,
//! the alert parser, the incident manager and the cache-sync listeners.
//!
//! ## Responsibilities
//!
//! - **Initialization**: the `SupervisorBuilder` constructs and wires all
//!   services together, injecting configuration and the database pool.
//! - **Lifecycle management**: the `Supervisor` starts all services and
//!   manages their lifetimes.
//! - **Graceful shutdown**: it listens for shutdown signals (Ctrl+C or
//!   SIGTERM) and orchestrates a clean shutdown of every managed task.
//! - **Task supervision**: if a supervised task fails, the supervisor shuts
//!   everything else down rather than continuing partially functional.

mod builder;

use std::sync::Arc;

pub use builder::SupervisorBuilder;
use thiserror::Error;
use tokio::{signal, sync::mpsc};

use crate::{
    cache::Cache,
    collectors::{Collector, CollectorPayload},
    config::ServiceConfig,
    engine::{IncidentManager, run_incidents_cache_sync, run_rules_cache_sync},
    models::{Alert, Incident, Rule},
    parser::AlertsParser,
    persistence::{
        PostgresStateRepository,
        error::PersistenceError,
        traits::{IncidentsRepository, RulesRepository},
    },
};

/// Represents the set of errors that can occur during the supervisor's
/// operation.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A database configuration was not provided to the builder.
    #[error("Missing database configuration for Supervisor")]
    MissingDatabaseConfig,

    /// A service configuration was not provided to the builder.
    #[error("Missing service configuration for Supervisor")]
    MissingServiceConfig,

    /// The persistence layer failed during initialization.
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// The primary runtime manager for the application.
///
/// The supervisor owns all major components and is responsible for their
/// startup, shutdown, and health monitoring. Once `run` is called, it
/// becomes the main process loop for the entire application.
pub struct Supervisor {
    /// Shared service configuration (channel sizes).
    service_config: ServiceConfig,

    /// The persistent store; also the source of change notifications.
    state: Arc<PostgresStateRepository>,

    /// Rules repository view of the store.
    rules_repo: Arc<dyn RulesRepository>,

    /// Incidents repository view of the store.
    incidents_repo: Arc<dyn IncidentsRepository>,

    /// Cached rules, kept warm by change notifications.
    rules_cache: Arc<Cache<Rule>>,

    /// Cached incidents, kept warm by change notifications.
    incidents_cache: Arc<Cache<Incident>>,

    /// The upstream pollers.
    collectors: Vec<Box<dyn Collector>>,

    /// The alert parser and aggregator.
    parser: AlertsParser,

    /// The incident state manager.
    manager: Arc<IncidentManager>,

    /// A token used to signal a graceful shutdown to all supervised tasks.
    cancellation_token: tokio_util::sync::CancellationToken,

    /// A set of all spawned tasks that the supervisor is actively managing.
    join_set: tokio::task::JoinSet<()>,
}

impl Supervisor {
    /// Returns a new `SupervisorBuilder` instance.
    pub fn builder() -> SupervisorBuilder {
        SupervisorBuilder::new()
    }

    /// Starts the supervisor and all its managed services.
    ///
    /// Warm-up happens first (both caches are repopulated from the store);
    /// then the signal handler, collectors, parser, incident loop and the
    /// two notification listeners are spawned. The main loop watches for
    /// cancellation and task failures. On shutdown every task is drained,
    /// the pool closed and the caches cleared.
    pub async fn run(mut self) -> Result<(), SupervisorError> {
        tracing::info!("Starting the incidents pipeline.");

        // Populate the caches before anything can observe them, then
        // subscribe to change notifications to keep them warm.
        self.manager.initialize_caches().await;

        let cancellation_token = self.cancellation_token.clone();

        // Spawn a task to listen for shutdown signals.
        self.join_set.spawn(async move {
            let ctrl_c = signal::ctrl_c();
            #[cfg(unix)]
            let terminate = async {
                signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("Failed to register SIGTERM handler")
                    .recv()
                    .await;
            };
            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => tracing::info!("SIGINT (Ctrl+C) received, initiating graceful shutdown."),
                _ = terminate => tracing::info!("SIGTERM received, initiating graceful shutdown."),
            }

            // Notify all other tasks to begin shutting down.
            cancellation_token.cancel();
        });

        // The channel connecting collectors to the parser.
        let (data_tx, data_rx) =
            mpsc::channel::<CollectorPayload>(self.service_config.channel_data_max_size);

        // The channel connecting the parser to the incident manager.
        let (alerts_tx, alerts_rx) =
            mpsc::channel::<Vec<Alert>>(self.service_config.channel_alerts_max_size);

        // Spawn the collectors.
        for collector in self.collectors.drain(..) {
            let token = self.cancellation_token.clone();
            let out = data_tx.clone();
            self.join_set.spawn(async move {
                collector.run(token, out).await;
            });
        }
        // The collectors hold the only senders now; the channel closes when
        // the last of them exits.
        drop(data_tx);

        // Spawn the parser.
        let parser = self.parser;
        let parser_token = self.cancellation_token.clone();
        self.join_set.spawn(async move {
            parser.run(parser_token, data_rx, alerts_tx).await;
        });

        // Spawn the incident processing loop.
        let manager = Arc::clone(&self.manager);
        let manager_token = self.cancellation_token.clone();
        self.join_set.spawn(async move {
            manager.run(manager_token, alerts_rx).await;
        });

        // Spawn the two cache-sync listeners.
        self.join_set.spawn(run_rules_cache_sync(
            self.cancellation_token.clone(),
            self.state.pool().clone(),
            Arc::clone(&self.rules_cache),
            Arc::clone(&self.rules_repo),
        ));
        self.join_set.spawn(run_incidents_cache_sync(
            self.cancellation_token.clone(),
            self.state.pool().clone(),
            Arc::clone(&self.incidents_cache),
            Arc::clone(&self.incidents_repo),
        ));

        tracing::info!("The incidents pipeline successfully started; waiting for alerts.");

        // This is the main supervision loop.
        loop {
            tokio::select! {
                // Use `biased` to ensure the shutdown signal is always checked first.
                biased;

                // Branch 1: a shutdown has been requested.
                _ = self.cancellation_token.cancelled() => {
                    tracing::info!("Supervisor cancellation signal received, shutting down...");
                    break;
                }

                // Branch 2: a supervised task has terminated.
                Some(result) = self.join_set.join_next() => {
                    if let Err(e) = result {
                        tracing::error!("A critical task failed: {:?}. Initiating shutdown.", e);
                        self.cancellation_token.cancel();
                    }
                }
            }
        }

        // --- Graceful shutdown ---

        // Wait for all spawned tasks to complete.
        self.join_set.shutdown().await;
        tracing::info!("All supervised tasks have completed.");

        self.state.close().await;
        self.rules_cache.clear();
        self.incidents_cache.clear();

        tracing::info!("The incidents pipeline has been stopped.");
        Ok(())
    }
}

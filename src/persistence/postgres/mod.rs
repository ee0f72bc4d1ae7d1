//! This module provides the concrete Postgres implementation of the
//! repository traits.

use sqlx::{
    PgPool, Postgres, QueryBuilder,
    postgres::{PgConnectOptions, PgPoolOptions},
};

pub mod incidents_repository;
pub mod rules_repository;

use crate::{
    config::DatabaseConfig,
    persistence::{
        error::PersistenceError,
        traits::{FilterValue, Filters, TimeRange},
    },
};

/// A concrete implementation of the repository traits backed by PostgreSQL.
pub struct PostgresStateRepository {
    /// The Postgres connection pool used for database operations.
    pool: PgPool,
}

impl PostgresStateRepository {
    /// Creates a new repository, connecting a pool with the configured
    /// credentials and size.
    #[tracing::instrument(level = "info", skip(cfg))]
    pub async fn new(cfg: &DatabaseConfig) -> Result<Self, PersistenceError> {
        tracing::debug!(host = %cfg.host, database = %cfg.name, "Connecting to Postgres.");

        let options = PgConnectOptions::new()
            .host(&cfg.host)
            .port(cfg.port)
            .database(&cfg.name)
            .username(&cfg.user)
            .password(&cfg.password);

        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| {
                PersistenceError::OperationFailed(format!("Failed to connect to database: {e}"))
            })?;

        tracing::info!(host = %cfg.host, database = %cfg.name, "Connected to Postgres.");
        Ok(Self { pool })
    }

    /// Wraps an existing pool; used by tests and tools that manage their own
    /// connection.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs the embedded database migrations.
    #[tracing::instrument(skip(self), level = "info")]
    pub async fn run_migrations(&self) -> Result<(), PersistenceError> {
        tracing::debug!("Running database migrations.");
        sqlx::migrate!("./migrations").run(&self.pool).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run database migrations.");
            PersistenceError::MigrationError(e.to_string())
        })?;
        tracing::info!("Database migrations completed successfully.");
        Ok(())
    }

    /// Gets access to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Closes the connection pool gracefully.
    #[tracing::instrument(skip(self), level = "info")]
    pub async fn close(&self) {
        tracing::debug!("Closing the Postgres connection pool.");
        self.pool.close().await;
        tracing::info!("Postgres connection pool closed.");
    }
}

/// Appends `AND`-ed filter conditions to a query.
///
/// Filter column names are interpolated verbatim; callers are trusted to
/// allow-list them (§ the CRUD surface does). Scalar filters compare with
/// `=`, list filters with array containment.
pub(crate) fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, filters: &Filters) {
    for (column, value) in filters {
        if column == "created_at" || column == "updated_at" {
            continue;
        }
        match value {
            FilterValue::Text(text) => {
                builder.push(format!(" AND {column} = "));
                builder.push_bind(text.clone());
            }
            FilterValue::Flag(flag) => {
                builder.push(format!(" AND {column} = "));
                builder.push_bind(*flag);
            }
            FilterValue::List(items) => {
                builder.push(format!(" AND {column} @> "));
                builder.push_bind(items.clone());
            }
        }
    }
}

/// Appends the inclusive `created_at` range condition to a query.
pub(crate) fn push_time_range(
    builder: &mut QueryBuilder<'_, Postgres>,
    time_range: Option<TimeRange>,
) {
    if let Some(range) = time_range {
        builder.push(" AND created_at BETWEEN ");
        builder.push_bind(range.start);
        builder.push(" AND ");
        builder.push_bind(range.end);
    }
}

/// Maps a sqlx error to the persistence error type with a common log line.
pub(crate) fn operation_failed(operation: &str, error: sqlx::Error) -> PersistenceError {
    tracing::error!(error = %error, operation, "Database operation failed.");
    PersistenceError::OperationFailed(error.to_string())
}

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

/// Connection settings for the PostgreSQL database, loaded from the
/// `DATABASE_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Hostname or IP of the database server.
    pub host: String,

    /// Port of the database server.
    pub port: u16,

    /// Database name.
    pub name: String,

    /// Database user.
    pub user: String,

    /// Database password.
    pub password: String,

    /// Maximum number of pooled connections.
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// Loads the database configuration from `DATABASE_*` environment
    /// variables and validates it.
    pub fn load() -> Result<Self, ConfigError> {
        let cfg: DatabaseConfig = Config::builder()
            .add_source(Environment::with_prefix("DATABASE"))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates the loaded settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Message("DATABASE_HOST must not be empty".into()));
        }
        if self.name.is_empty() {
            return Err(ConfigError::Message("DATABASE_NAME must not be empty".into()));
        }
        if self.user.is_empty() {
            return Err(ConfigError::Message("DATABASE_USER must not be empty".into()));
        }
        if !(1..=100).contains(&self.max_connections) {
            return Err(ConfigError::Message(
                "DATABASE_MAX_CONNECTIONS must be between 1 and 100".into(),
            ));
        }
        Ok(())
    }
}

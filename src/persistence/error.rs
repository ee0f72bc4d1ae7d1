//! This module contains the error types for the persistence layer.

use thiserror::Error;

/// Errors that can occur in the persistence layer.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// A general error occurred during a data store operation.
    #[error("A data store operation failed: {0}")]
    OperationFailed(String),

    /// The requested item was not found in the data store.
    #[error("The requested item was not found: {0}")]
    NotFound(String),

    /// A stored row could not be mapped back to its domain model.
    #[error("Failed to decode stored data: {0}")]
    SerializationError(String),

    /// An error occurred during a database migration.
    #[error("A data migration failed: {0}")]
    MigrationError(String),

    /// An invalid entity or input was rejected.
    #[error("An invalid entity or input was rejected: {0}")]
    InvalidInput(String),
}

//! Store errors

use esc_core::error::EscrowError;
use esc_core::traits::Id;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Id },

    #[error("Conflict: {0}")]
    Conflict(String),

    /// A compare-and-set write lost against a concurrent writer, or a
    /// batch guard did not hold
    #[error("Stale write on {entity} {id}: {message}")]
    StaleWrite {
        entity: &'static str,
        id: Id,
        message: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn stale(entity: &'static str, id: Id, message: impl Into<String>) -> Self {
        StoreError::StaleWrite {
            entity,
            id,
            message: message.into(),
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, StoreError::StaleWrite { .. })
    }
}

impl From<StoreError> for EscrowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => EscrowError::not_found(entity, id),
            StoreError::Conflict(message) => EscrowError::conflict(message),
            StoreError::StaleWrite {
                entity,
                id,
                message,
            } => EscrowError::invalid_state(entity, id, "update", message),
            StoreError::Database(e) => EscrowError::Database(e.to_string()),
            StoreError::Migration(e) => EscrowError::Database(e.to_string()),
        }
    }
}

//! Engine error type.

use fanout_core::error::CoreError;
use fanout_core::types::{DbId, Points};
use fanout_db::DbError;
use fanout_providers::{ProviderError, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Request failed validation; nothing was written.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Points, available: Points },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: DbId },

    /// The operation no longer applies to the entity's current state.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("database error: {0}")]
    Database(DbError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<DbError> for PipelineError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::UserNotFound(id) => Self::NotFound { entity: "user", id },
            DbError::TaskNotFound(id) => Self::NotFound { entity: "task", id },
            DbError::TaskClosed(id) => Self::Conflict(format!("task {id} is already final")),
            DbError::InsufficientBalance {
                required,
                available,
            } => Self::InsufficientBalance {
                required,
                available,
            },
            other => Self::Database(other),
        }
    }
}

impl From<CoreError> for PipelineError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Validation(msg) => Self::Validation(msg),
            CoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            CoreError::InsufficientBalance {
                required,
                available,
            } => Self::InsufficientBalance {
                required,
                available,
            },
            CoreError::Conflict(msg) => Self::Conflict(msg),
            CoreError::Internal(msg) => Self::Internal(msg),
        }
    }
}

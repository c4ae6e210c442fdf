use std::error::Error;
use thiserror::Error;

use crate::dao::models::PollId;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached or failed.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// What was being attempted.
        message: String,
        /// Backend error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// No open poll with this id.
    #[error("poll `{id}` not found")]
    NotFound {
        /// Poll looked up.
        id: PollId,
    },
    /// Another poll is already open for the topic.
    #[error("an open poll already exists for topic `{topic}`")]
    AlreadyExists {
        /// Topic already taken.
        topic: String,
    },
    /// A concurrent write won; the operation can be tried again.
    #[error("write conflict while {operation}")]
    Conflict {
        /// Operation that lost the race.
        operation: &'static str,
    },
    /// The configured backend was not compiled in.
    #[error("storage backend `{backend}` is not compiled in")]
    Unsupported {
        /// Backend name.
        backend: &'static str,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Transient failures that are worth retrying immediately.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }

    /// The poll was missing or already closed.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

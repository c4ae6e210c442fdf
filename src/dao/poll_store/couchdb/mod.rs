mod config;
mod error;
mod models;
mod store;

pub use config::CouchConfig;
pub use error::CouchDaoError;
pub use store::CouchPollStore;

use crate::dao::storage::StorageError;

impl From<CouchDaoError> for StorageError {
    fn from(err: CouchDaoError) -> Self {
        match err {
            CouchDaoError::TopicTaken { topic } => StorageError::AlreadyExists { topic },
            CouchDaoError::RevisionConflict { operation, .. } => {
                StorageError::Conflict { operation }
            }
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}

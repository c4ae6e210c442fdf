#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::config::StoreBackend;
use crate::dao::models::{ClosedPollEntity, PollEntity, PollId, VoteEntity};
use crate::dao::storage::StorageResult;

/// Abstraction over the persistence layer for open polls and their votes.
///
/// Every mutating operation is atomic with respect to the other operations on the
/// same poll: a vote can never survive its poll, and two polls can never be open
/// for the same topic.
pub trait PollStore: Send + Sync {
    /// Insert a new open poll, failing with `StorageError::AlreadyExists` when the topic
    /// is already taken by an open poll.
    fn create_open_poll(&self, poll: PollEntity) -> BoxFuture<'static, StorageResult<PollEntity>>;
    /// Open poll for `topic`, if any.
    fn find_open_poll_by_topic(
        &self,
        topic: String,
    ) -> BoxFuture<'static, StorageResult<Option<PollEntity>>>;
    /// Open poll `id`, if it has not been closed.
    fn find_poll(&self, id: PollId) -> BoxFuture<'static, StorageResult<Option<PollEntity>>>;
    /// Record `vote`, replacing any previous vote from the same user on the same poll.
    /// Fails with `StorageError::NotFound` when the poll is not open.
    fn upsert_vote(&self, vote: VoteEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Current votes of open poll `id`; empty when the poll is unknown.
    fn list_votes(&self, poll_id: PollId) -> BoxFuture<'static, StorageResult<Vec<VoteEntity>>>;
    /// Delete the poll and all of its votes in one step, returning what was deleted.
    /// Fails with `StorageError::NotFound` when the poll was already closed.
    fn close_poll(&self, id: PollId) -> BoxFuture<'static, StorageResult<ClosedPollEntity>>;
    /// Every open poll.
    fn list_open_polls(&self) -> BoxFuture<'static, StorageResult<Vec<PollEntity>>>;
    /// Cheap round-trip to the backend.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the backend connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Connect the configured storage backend.
pub async fn connect(backend: StoreBackend) -> StorageResult<Arc<dyn PollStore>> {
    match backend {
        StoreBackend::Memory => Ok(Arc::new(memory::MemoryPollStore::new())),
        #[cfg(feature = "mongo-store")]
        StoreBackend::Mongo => {
            let config = self::mongodb::MongoConfig::from_env().await?;
            let store = self::mongodb::MongoPollStore::connect(config).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "mongo-store"))]
        StoreBackend::Mongo => Err(crate::dao::storage::StorageError::Unsupported {
            backend: "mongo",
        }),
        #[cfg(feature = "couch-store")]
        StoreBackend::Couch => {
            let config = couchdb::CouchConfig::from_env()?;
            let store = couchdb::CouchPollStore::connect(config).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "couch-store"))]
        StoreBackend::Couch => Err(crate::dao::storage::StorageError::Unsupported {
            backend: "couch",
        }),
    }
}

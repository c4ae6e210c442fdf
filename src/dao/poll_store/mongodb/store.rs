use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::doc,
    error::{Error as MongoError, ErrorKind, TRANSIENT_TRANSACTION_ERROR, WriteFailure},
    options::IndexOptions,
};
use tokio::sync::RwLock;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{MongoPollDocument, doc_id, upsert_vote_pipeline, without_votes},
};
use crate::dao::{
    models::{ClosedPollEntity, PollEntity, PollId, VoteEntity},
    poll_store::PollStore,
    storage::{StorageError, StorageResult},
};

const POLL_COLLECTION_NAME: &str = "polls";
const DUPLICATE_KEY_CODE: i32 = 11000;
const WRITE_CONFLICT_CODE: i32 = 112;

#[derive(Clone)]
pub struct MongoPollStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    #[allow(dead_code)]
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoPollStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        // The unique topic index is what makes poll creation race-free.
        let index = IndexModel::builder()
            .keys(doc! {"topic": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("poll_topic_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();

        self.collection()
            .await
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: POLL_COLLECTION_NAME,
                index: "topic",
                source,
            })?;

        Ok(())
    }

    async fn collection(&self) -> Collection<MongoPollDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoPollDocument>(POLL_COLLECTION_NAME)
    }

    async fn create_open_poll(&self, poll: PollEntity) -> MongoResult<PollEntity> {
        let document = MongoPollDocument::from(poll.clone());
        let collection = self.collection().await;

        collection
            .insert_one(&document)
            .await
            .map_err(|source| {
                if is_duplicate_key(&source) {
                    MongoDaoError::DuplicateTopic {
                        topic: poll.topic.clone(),
                    }
                } else {
                    MongoDaoError::CreatePoll {
                        topic: poll.topic.clone(),
                        source,
                    }
                }
            })?;

        Ok(poll)
    }

    async fn find_open_poll_by_topic(&self, topic: String) -> MongoResult<Option<PollEntity>> {
        let collection = self.collection().await;

        let document = collection
            .find_one(doc! {"topic": topic.as_str()})
            .projection(without_votes())
            .await
            .map_err(|source| MongoDaoError::LoadPoll { key: topic, source })?;

        document.map(MongoPollDocument::into_entity).transpose()
    }

    async fn find_document(&self, id: PollId) -> MongoResult<Option<MongoPollDocument>> {
        let collection = self.collection().await;

        collection
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::LoadPoll {
                key: id.to_string(),
                source,
            })
    }

    async fn upsert_vote(&self, vote: VoteEntity) -> StorageResult<()> {
        let collection = self.collection().await;
        let poll_id = vote.poll_id;

        // A single pipeline update on the poll document: either the poll exists and the
        // vote is swapped in atomically, or nothing matches and the vote is rejected.
        let result = collection
            .update_one(doc_id(poll_id), upsert_vote_pipeline(&vote))
            .await
            .map_err(|source| {
                if is_write_conflict(&source) {
                    MongoDaoError::WriteConflict {
                        operation: "recording a vote",
                        source,
                    }
                } else {
                    MongoDaoError::SaveVote {
                        poll_id: poll_id.to_string(),
                        source,
                    }
                }
            })?;

        if result.matched_count == 0 {
            return Err(StorageError::NotFound { id: poll_id });
        }
        Ok(())
    }

    async fn close_poll(&self, id: PollId) -> StorageResult<ClosedPollEntity> {
        let collection = self.collection().await;

        let removed = collection
            .find_one_and_delete(doc_id(id))
            .await
            .map_err(|source| {
                if is_write_conflict(&source) {
                    MongoDaoError::WriteConflict {
                        operation: "closing a poll",
                        source,
                    }
                } else {
                    MongoDaoError::ClosePoll {
                        poll_id: id.to_string(),
                        source,
                    }
                }
            })?;

        match removed {
            Some(document) => Ok(document.into_closed()?),
            None => Err(StorageError::NotFound { id }),
        }
    }

    async fn list_open_polls(&self) -> MongoResult<Vec<PollEntity>> {
        let collection = self.collection().await;

        let documents: Vec<MongoPollDocument> = collection
            .find(doc! {})
            .projection(without_votes())
            .await
            .map_err(|source| MongoDaoError::ListPolls { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListPolls { source })?;

        documents
            .into_iter()
            .map(MongoPollDocument::into_entity)
            .collect()
    }
}

fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error))
            if write_error.code == DUPLICATE_KEY_CODE
    )
}

fn is_write_conflict(err: &MongoError) -> bool {
    err.contains_label(TRANSIENT_TRANSACTION_ERROR)
        || matches!(
            err.kind.as_ref(),
            ErrorKind::Command(command_error) if command_error.code == WRITE_CONFLICT_CODE
        )
}

impl PollStore for MongoPollStore {
    fn create_open_poll(&self, poll: PollEntity) -> BoxFuture<'static, StorageResult<PollEntity>> {
        let store = self.clone();
        Box::pin(async move { store.create_open_poll(poll).await.map_err(Into::into) })
    }

    fn find_open_poll_by_topic(
        &self,
        topic: String,
    ) -> BoxFuture<'static, StorageResult<Option<PollEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_open_poll_by_topic(topic)
                .await
                .map_err(Into::into)
        })
    }

    fn find_poll(&self, id: PollId) -> BoxFuture<'static, StorageResult<Option<PollEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let document = store.find_document(id).await?;
            Ok(document.map(MongoPollDocument::into_entity).transpose()?)
        })
    }

    fn upsert_vote(&self, vote: VoteEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.upsert_vote(vote).await })
    }

    fn list_votes(&self, poll_id: PollId) -> BoxFuture<'static, StorageResult<Vec<VoteEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let document = store.find_document(poll_id).await?;
            match document {
                Some(document) => Ok(document.into_votes()?),
                None => Ok(Vec::new()),
            }
        })
    }

    fn close_poll(&self, id: PollId) -> BoxFuture<'static, StorageResult<ClosedPollEntity>> {
        let store = self.clone();
        Box::pin(async move { store.close_poll(id).await })
    }

    fn list_open_polls(&self) -> BoxFuture<'static, StorageResult<Vec<PollEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_open_polls().await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}

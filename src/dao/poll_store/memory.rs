//! In-process poll store backed by sharded concurrent maps.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use indexmap::IndexMap;

use crate::dao::{
    models::{ClosedPollEntity, PollEntity, PollId, VoteEntity},
    poll_store::PollStore,
    storage::{StorageError, StorageResult},
};

/// Volatile [`PollStore`] keeping open polls in memory.
///
/// Locking is per map shard, so unrelated polls never wait on each other. Votes of a
/// poll live inside the poll entry, which makes "delete poll and votes" a single
/// removal and prevents orphaned votes.
#[derive(Clone, Default)]
pub struct MemoryPollStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    topics: DashMap<String, PollId>,
    polls: DashMap<PollId, OpenPoll>,
}

struct OpenPoll {
    poll: PollEntity,
    // keyed by user, kept in cast order (a revote moves to the back)
    votes: IndexMap<String, VoteEntity>,
}

impl MemoryPollStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryInner {
    fn create_open_poll(&self, poll: PollEntity) -> StorageResult<PollEntity> {
        // The topic entry stays locked until the poll is visible, so two concurrent
        // creations for one topic cannot both pass the uniqueness check.
        match self.topics.entry(poll.topic.clone()) {
            Entry::Occupied(_) => Err(StorageError::AlreadyExists { topic: poll.topic }),
            Entry::Vacant(vacant) => {
                self.polls.insert(
                    poll.id,
                    OpenPoll {
                        poll: poll.clone(),
                        votes: IndexMap::new(),
                    },
                );
                vacant.insert(poll.id);
                Ok(poll)
            }
        }
    }

    fn find_open_poll_by_topic(&self, topic: &str) -> Option<PollEntity> {
        let id = *self.topics.get(topic)?;
        self.find_poll(id)
    }

    fn find_poll(&self, id: PollId) -> Option<PollEntity> {
        self.polls.get(&id).map(|open| open.poll.clone())
    }

    fn upsert_vote(&self, vote: VoteEntity) -> StorageResult<()> {
        let Some(mut open) = self.polls.get_mut(&vote.poll_id) else {
            return Err(StorageError::NotFound { id: vote.poll_id });
        };
        open.votes.shift_remove(&vote.user);
        open.votes.insert(vote.user.clone(), vote);
        Ok(())
    }

    fn list_votes(&self, poll_id: PollId) -> Vec<VoteEntity> {
        self.polls
            .get(&poll_id)
            .map(|open| open.votes.values().cloned().collect())
            .unwrap_or_default()
    }

    fn close_poll(&self, id: PollId) -> StorageResult<ClosedPollEntity> {
        let Some((_, open)) = self.polls.remove(&id) else {
            return Err(StorageError::NotFound { id });
        };
        self.topics.remove_if(&open.poll.topic, |_, owner| *owner == id);

        Ok(ClosedPollEntity {
            poll: open.poll,
            votes: open.votes.into_values().collect(),
        })
    }

    fn list_open_polls(&self) -> Vec<PollEntity> {
        self.polls.iter().map(|open| open.poll.clone()).collect()
    }
}

impl PollStore for MemoryPollStore {
    fn create_open_poll(&self, poll: PollEntity) -> BoxFuture<'static, StorageResult<PollEntity>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move { inner.create_open_poll(poll) })
    }

    fn find_open_poll_by_topic(
        &self,
        topic: String,
    ) -> BoxFuture<'static, StorageResult<Option<PollEntity>>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move { Ok(inner.find_open_poll_by_topic(&topic)) })
    }

    fn find_poll(&self, id: PollId) -> BoxFuture<'static, StorageResult<Option<PollEntity>>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move { Ok(inner.find_poll(id)) })
    }

    fn upsert_vote(&self, vote: VoteEntity) -> BoxFuture<'static, StorageResult<()>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move { inner.upsert_vote(vote) })
    }

    fn list_votes(&self, poll_id: PollId) -> BoxFuture<'static, StorageResult<Vec<VoteEntity>>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move { Ok(inner.list_votes(poll_id)) })
    }

    fn close_poll(&self, id: PollId) -> BoxFuture<'static, StorageResult<ClosedPollEntity>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move { inner.close_poll(id) })
    }

    fn list_open_polls(&self) -> BoxFuture<'static, StorageResult<Vec<PollEntity>>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move { Ok(inner.list_open_polls()) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;

    fn poll(topic: &str) -> PollEntity {
        PollEntity::open(topic, Duration::from_secs(600), SystemTime::now())
    }

    fn vote(poll_id: PollId, user: &str, option: &str) -> VoteEntity {
        VoteEntity {
            poll_id,
            user: user.into(),
            option: option.into(),
            cast_at: SystemTime::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_topic_is_rejected_while_open() {
        let store = MemoryPollStore::new();
        store.create_open_poll(poll("lunch")).await.unwrap();

        let err = store.create_open_poll(poll("lunch")).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { topic } if topic == "lunch"));
    }

    #[tokio::test]
    async fn topics_are_case_sensitive() {
        let store = MemoryPollStore::new();
        store.create_open_poll(poll("Lunch")).await.unwrap();
        store.create_open_poll(poll("lunch")).await.unwrap();

        assert_eq!(store.list_open_polls().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn revote_replaces_previous_choice() {
        let store = MemoryPollStore::new();
        let created = store.create_open_poll(poll("lunch")).await.unwrap();

        store.upsert_vote(vote(created.id, "alice", "tacos")).await.unwrap();
        store.upsert_vote(vote(created.id, "bob", "sushi")).await.unwrap();
        store.upsert_vote(vote(created.id, "alice", "ramen")).await.unwrap();

        let votes = store.list_votes(created.id).await.unwrap();
        let summary: Vec<_> = votes
            .iter()
            .map(|v| (v.user.as_str(), v.option.as_str()))
            .collect();
        assert_eq!(summary, vec![("bob", "sushi"), ("alice", "ramen")]);
    }

    #[tokio::test]
    async fn vote_on_unknown_poll_is_not_found() {
        let store = MemoryPollStore::new();
        let missing = PollId::new_v4();

        let err = store.upsert_vote(vote(missing, "alice", "tacos")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn close_returns_votes_and_purges_everything() {
        let store = MemoryPollStore::new();
        let created = store.create_open_poll(poll("lunch")).await.unwrap();
        store.upsert_vote(vote(created.id, "alice", "tacos")).await.unwrap();

        let closed = store.close_poll(created.id).await.unwrap();
        assert_eq!(closed.poll, created);
        assert_eq!(closed.votes.len(), 1);

        assert!(store.close_poll(created.id).await.unwrap_err().is_not_found());
        assert!(store.find_poll(created.id).await.unwrap().is_none());
        assert!(
            store
                .find_open_poll_by_topic("lunch".into())
                .await
                .unwrap()
                .is_none()
        );
        assert!(store.list_votes(created.id).await.unwrap().is_empty());

        let late = store.upsert_vote(vote(created.id, "bob", "sushi")).await;
        assert!(late.unwrap_err().is_not_found());

        store.create_open_poll(poll("lunch")).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creation_opens_a_single_poll() {
        let store = MemoryPollStore::new();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.create_open_poll(poll("race")).await })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(store.list_open_polls().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_close_has_a_single_winner() {
        let store = MemoryPollStore::new();
        let created = store.create_open_poll(poll("race")).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.close_poll(created.id).await })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(err) => assert!(err.is_not_found()),
            }
        }

        assert_eq!(winners, 1);
    }
}

//! Poll state machine: open, vote, close.
//!
//! A poll is open while its record exists in the store and closed once the record is
//! gone. Closing goes through a single atomic delete-and-read in the store, which is
//! what makes [`PollLifecycle::close`] safe to call from several triggers at once: only
//! one caller receives the tally, every other one observes [`CloseOutcome::NoOp`].

use std::{
    fmt,
    future::Future,
    sync::Arc,
    time::{Duration, SystemTime},
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    dao::{
        models::{PollEntity, PollId, VoteEntity},
        poll_store::PollStore,
        storage::{StorageError, StorageResult},
    },
    state::{scheduler::Scheduler, tally::Tally},
};

/// Failures of lifecycle operations.
///
/// Every variant but [`PollError::Storage`] is caused by user input and is meant to be
/// turned into a chat reply.
#[derive(Debug, Error)]
pub enum PollError {
    /// The requested duration is not a positive number of minutes.
    #[error("`{input}` is not a valid number of minutes")]
    InvalidDuration { input: String },
    /// The topic is empty or blank.
    #[error("a poll needs a topic")]
    InvalidTopic,
    /// A poll is already open for this topic.
    #[error("a poll for `{topic}` is already open")]
    DuplicateTopic { topic: String },
    /// No poll is open for this topic.
    #[error("no poll is open for `{topic}`")]
    NoSuchPoll { topic: String },
    /// The store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Longest accepted poll, one hundred years.
pub const MAX_POLL_MINUTES: f64 = 100.0 * 365.0 * 24.0 * 60.0;

/// Positive poll duration, as requested in (possibly fractional) minutes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollDuration {
    minutes: f64,
    duration: Duration,
}

impl PollDuration {
    /// Parse a textual number of minutes such as `10` or `2.5`.
    pub fn from_minutes(input: &str) -> Result<Self, PollError> {
        let invalid = || PollError::InvalidDuration {
            input: input.to_owned(),
        };

        let minutes: f64 = input.trim().parse().map_err(|_| invalid())?;
        if !minutes.is_finite() || minutes <= 0.0 || minutes > MAX_POLL_MINUTES {
            return Err(invalid());
        }
        let duration = Duration::try_from_secs_f64(minutes * 60.0).map_err(|_| invalid())?;
        if duration.is_zero() {
            return Err(invalid());
        }

        Ok(Self { minutes, duration })
    }

    /// Requested number of minutes.
    pub fn minutes(&self) -> f64 {
        self.minutes
    }

    /// Duration as a [`Duration`].
    pub fn as_duration(&self) -> Duration {
        self.duration
    }
}

impl fmt::Display for PollDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.minutes)
    }
}

/// Confirmation of a recorded vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteReceipt {
    /// Poll the vote was recorded on.
    pub poll_id: PollId,
    /// Topic of that poll.
    pub topic: String,
    /// Voting user.
    pub user: String,
    /// Option now held by the user.
    pub option: String,
}

/// A poll that was just closed by the current caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedPoll {
    /// The removed poll.
    pub poll: PollEntity,
    /// Full ranking of the votes it held.
    pub tally: Tally,
}

/// Result of [`PollLifecycle::close`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// This call closed the poll.
    Closed(ClosedPoll),
    /// The poll was already closed.
    NoOp,
}

/// Drives polls through their lifecycle on top of a [`PollStore`].
#[derive(Clone)]
pub struct PollLifecycle {
    store: Arc<dyn PollStore>,
    max_attempts: u32,
}

impl PollLifecycle {
    /// Build a lifecycle retrying store conflicts up to `max_attempts` times in total.
    pub fn new(store: Arc<dyn PollStore>, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Open a poll on `topic` and arm its expiry timer.
    pub async fn start(
        &self,
        scheduler: &Scheduler,
        topic: &str,
        duration: PollDuration,
        initiator: &str,
    ) -> Result<PollEntity, PollError> {
        if topic.trim().is_empty() {
            return Err(PollError::InvalidTopic);
        }
        if self
            .store
            .find_open_poll_by_topic(topic.to_owned())
            .await?
            .is_some()
        {
            return Err(PollError::DuplicateTopic {
                topic: topic.to_owned(),
            });
        }

        let created_at = SystemTime::now();
        if created_at.checked_add(duration.as_duration()).is_none() {
            return Err(PollError::InvalidDuration {
                input: duration.to_string(),
            });
        }
        let poll = PollEntity::open(topic, duration.as_duration(), created_at);

        let created = self
            .with_retry("create poll", || self.store.create_open_poll(poll.clone()))
            .await
            .map_err(|err| match err {
                StorageError::AlreadyExists { topic } => PollError::DuplicateTopic { topic },
                other => PollError::Storage(other),
            })?;

        scheduler.arm(created.id, created.end_time);
        info!(
            poll_id = %created.id,
            topic = %created.topic,
            initiator,
            minutes = duration.minutes(),
            "poll started"
        );
        Ok(created)
    }

    /// Record `user`'s vote on the poll open for `topic`, replacing any earlier vote.
    pub async fn cast_vote(
        &self,
        topic: &str,
        user: &str,
        option: &str,
    ) -> Result<VoteReceipt, PollError> {
        let no_such_poll = || PollError::NoSuchPoll {
            topic: topic.to_owned(),
        };

        let Some(poll) = self.store.find_open_poll_by_topic(topic.to_owned()).await? else {
            return Err(no_such_poll());
        };

        let vote = VoteEntity {
            poll_id: poll.id,
            user: user.to_owned(),
            option: option.to_owned(),
            cast_at: SystemTime::now(),
        };

        match self
            .with_retry("record vote", || self.store.upsert_vote(vote.clone()))
            .await
        {
            Ok(()) => {}
            // closed between the lookup and the write
            Err(StorageError::NotFound { .. }) => return Err(no_such_poll()),
            Err(err) => return Err(err.into()),
        }

        debug!(poll_id = %poll.id, topic, user, "vote recorded");
        Ok(VoteReceipt {
            poll_id: poll.id,
            topic: poll.topic,
            user: vote.user,
            option: vote.option,
        })
    }

    /// Close poll `id`, returning its tally to the single caller that actually closed it.
    ///
    /// On error the poll is left open so that the close can be tried again.
    pub async fn close(&self, id: PollId) -> Result<CloseOutcome, PollError> {
        match self
            .with_retry("close poll", || self.store.close_poll(id))
            .await
        {
            Ok(closed) => {
                let tally = Tally::from_votes(&closed.votes);
                info!(
                    poll_id = %id,
                    topic = %closed.poll.topic,
                    votes = tally.total_votes(),
                    "poll closed"
                );
                Ok(CloseOutcome::Closed(ClosedPoll {
                    poll: closed.poll,
                    tally,
                }))
            }
            Err(StorageError::NotFound { .. }) => {
                debug!(poll_id = %id, "poll already closed");
                Ok(CloseOutcome::NoOp)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Open polls, used to re-arm timers after a restart.
    pub async fn open_polls(&self) -> Result<Vec<PollEntity>, PollError> {
        Ok(self.store.list_open_polls().await?)
    }

    /// Find open poll `id`.
    pub async fn find_poll(&self, id: PollId) -> Result<Option<PollEntity>, PollError> {
        Ok(self.store.find_poll(id).await?)
    }

    /// Votes currently held by open poll `id`.
    pub async fn current_tally(&self, id: PollId) -> Result<Tally, PollError> {
        let votes = self.store.list_votes(id).await?;
        Ok(Tally::from_votes(&votes))
    }

    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut call: F) -> StorageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Err(err) if err.is_conflict() && attempt < self.max_attempts => {
                    warn!(operation, attempt, error = %err, "store conflict; retrying");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use futures::future::BoxFuture;

    use super::*;
    use crate::dao::{models::ClosedPollEntity, poll_store::memory::MemoryPollStore};

    fn lifecycle() -> (PollLifecycle, Scheduler) {
        let (scheduler, _fired) = Scheduler::new();
        (
            PollLifecycle::new(Arc::new(MemoryPollStore::new()), 3),
            scheduler,
        )
    }

    fn minutes(input: &str) -> PollDuration {
        PollDuration::from_minutes(input).unwrap()
    }

    async fn open_poll(lifecycle: &PollLifecycle, topic: &str) -> Option<PollEntity> {
        lifecycle
            .store
            .find_open_poll_by_topic(topic.to_owned())
            .await
            .unwrap()
    }

    #[test]
    fn durations_must_be_positive_finite_minutes() {
        assert_eq!(minutes("10").as_duration(), Duration::from_secs(600));
        assert_eq!(minutes(" 2.5 ").as_duration(), Duration::from_secs(150));
        assert_eq!(minutes("0.5").to_string(), "0.5");
        assert_eq!(minutes("52560000").minutes(), MAX_POLL_MINUTES);

        for input in ["0", "-3", "abc", "", "NaN", "inf", "1e10", "1e300", "1e-30"] {
            assert!(
                matches!(
                    PollDuration::from_minutes(input),
                    Err(PollError::InvalidDuration { .. })
                ),
                "{input} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn start_sets_end_time_from_duration() {
        let (lifecycle, scheduler) = lifecycle();

        let poll = lifecycle
            .start(&scheduler, "lunch", minutes("10"), "alice")
            .await
            .unwrap();

        let stored = open_poll(&lifecycle, "lunch").await.unwrap();
        assert_eq!(stored, poll);
        assert_eq!(
            stored.end_time.duration_since(stored.created_at).unwrap(),
            Duration::from_secs(600)
        );
        assert_eq!(scheduler.fire_at(poll.id), Some(poll.end_time));
    }

    #[tokio::test]
    async fn second_poll_on_same_topic_is_rejected() {
        let (lifecycle, scheduler) = lifecycle();
        lifecycle
            .start(&scheduler, "lunch", minutes("10"), "alice")
            .await
            .unwrap();

        let err = lifecycle
            .start(&scheduler, "lunch", minutes("5"), "bob")
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::DuplicateTopic { topic } if topic == "lunch"));
        assert_eq!(scheduler.armed_count(), 1);
    }

    #[tokio::test]
    async fn blank_topic_is_rejected() {
        let (lifecycle, scheduler) = lifecycle();
        let err = lifecycle
            .start(&scheduler, "   ", minutes("1"), "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::InvalidTopic));
    }

    #[tokio::test]
    async fn vote_without_open_poll_is_no_such_poll() {
        let (lifecycle, _scheduler) = lifecycle();
        let err = lifecycle
            .cast_vote("lunch", "alice", "tacos")
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::NoSuchPoll { topic } if topic == "lunch"));
    }

    #[tokio::test]
    async fn last_vote_wins() {
        let (lifecycle, scheduler) = lifecycle();
        let poll = lifecycle
            .start(&scheduler, "lunch", minutes("10"), "alice")
            .await
            .unwrap();

        lifecycle.cast_vote("lunch", "alice", "tacos").await.unwrap();
        let receipt = lifecycle.cast_vote("lunch", "alice", "ramen").await.unwrap();
        assert_eq!(receipt.option, "ramen");

        let CloseOutcome::Closed(closed) = lifecycle.close(poll.id).await.unwrap() else {
            panic!("poll should close");
        };
        assert_eq!(closed.tally.standings().len(), 1);
        assert_eq!(closed.tally.standings()[0].option, "ramen");
    }

    #[tokio::test]
    async fn second_close_is_a_no_op() {
        let (lifecycle, scheduler) = lifecycle();
        let poll = lifecycle
            .start(&scheduler, "lunch", minutes("10"), "alice")
            .await
            .unwrap();

        assert!(matches!(
            lifecycle.close(poll.id).await.unwrap(),
            CloseOutcome::Closed(_)
        ));
        assert_eq!(lifecycle.close(poll.id).await.unwrap(), CloseOutcome::NoOp);
        assert!(open_poll(&lifecycle, "lunch").await.is_none());

        lifecycle
            .start(&scheduler, "lunch", minutes("5"), "bob")
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn votes_racing_a_close_are_counted_or_rejected() {
        let (lifecycle, scheduler) = lifecycle();
        let poll = lifecycle
            .start(&scheduler, "lunch", minutes("10"), "alice")
            .await
            .unwrap();

        // each user votes for an option named after them, so the tally shows who got in
        let voters: Vec<_> = (0..64)
            .map(|i| {
                let lifecycle = lifecycle.clone();
                tokio::spawn(async move {
                    let user = format!("user{i}");
                    let outcome = lifecycle.cast_vote("lunch", &user, &user).await;
                    (user, outcome)
                })
            })
            .collect();
        let closer = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.close(poll.id).await })
        };

        let CloseOutcome::Closed(closed) = closer.await.unwrap().unwrap() else {
            panic!("poll should close");
        };
        let counted: Vec<&str> = closed
            .tally
            .standings()
            .iter()
            .map(|standing| standing.option.as_str())
            .collect();

        let mut accepted = 0;
        for voter in voters {
            let (user, outcome) = voter.await.unwrap();
            match outcome {
                Ok(receipt) => {
                    assert!(counted.contains(&receipt.user.as_str()), "{user} was dropped");
                    accepted += 1;
                }
                Err(PollError::NoSuchPoll { .. }) => {}
                Err(err) => panic!("unexpected error for {user}: {err}"),
            }
        }
        assert_eq!(closed.tally.total_votes(), accepted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_starts_open_a_single_poll() {
        let (lifecycle, scheduler) = lifecycle();
        let scheduler = Arc::new(scheduler);

        let starts: Vec<_> = (0..16)
            .map(|i| {
                let lifecycle = lifecycle.clone();
                let scheduler = scheduler.clone();
                tokio::spawn(async move {
                    lifecycle
                        .start(&scheduler, "lunch", minutes("10"), &format!("user{i}"))
                        .await
                })
            })
            .collect();

        let mut opened = 0;
        for start in starts {
            match start.await.unwrap() {
                Ok(_) => opened += 1,
                Err(PollError::DuplicateTopic { topic }) => assert_eq!(topic, "lunch"),
                Err(err) => panic!("unexpected error: {err}"),
            }
        }
        assert_eq!(opened, 1);
        assert_eq!(scheduler.armed_count(), 1);
    }

    #[tokio::test]
    async fn topic_taken_at_insert_is_a_duplicate() {
        let (scheduler, _fired) = Scheduler::new();
        let store = Arc::new(BlindStore::default());
        let lifecycle = PollLifecycle::new(store.clone(), 3);

        lifecycle
            .start(&scheduler, "lunch", minutes("10"), "alice")
            .await
            .unwrap();
        let err = lifecycle
            .start(&scheduler, "lunch", minutes("5"), "bob")
            .await
            .unwrap_err();

        assert!(matches!(err, PollError::DuplicateTopic { topic } if topic == "lunch"));
        assert_eq!(scheduler.armed_count(), 1);
    }

    /// Store that never reports an open poll by topic, so duplicates surface at insert.
    #[derive(Default)]
    struct BlindStore {
        inner: MemoryPollStore,
    }

    impl PollStore for BlindStore {
        fn create_open_poll(
            &self,
            poll: PollEntity,
        ) -> BoxFuture<'static, StorageResult<PollEntity>> {
            self.inner.create_open_poll(poll)
        }

        fn find_open_poll_by_topic(
            &self,
            _topic: String,
        ) -> BoxFuture<'static, StorageResult<Option<PollEntity>>> {
            Box::pin(async { Ok(None) })
        }

        fn find_poll(&self, id: PollId) -> BoxFuture<'static, StorageResult<Option<PollEntity>>> {
            self.inner.find_poll(id)
        }

        fn upsert_vote(&self, vote: VoteEntity) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.upsert_vote(vote)
        }

        fn list_votes(&self, poll_id: PollId) -> BoxFuture<'static, StorageResult<Vec<VoteEntity>>> {
            self.inner.list_votes(poll_id)
        }

        fn close_poll(&self, id: PollId) -> BoxFuture<'static, StorageResult<ClosedPollEntity>> {
            self.inner.close_poll(id)
        }

        fn list_open_polls(&self) -> BoxFuture<'static, StorageResult<Vec<PollEntity>>> {
            self.inner.list_open_polls()
        }

        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.health_check()
        }

        fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.try_reconnect()
        }
    }

    /// Store failing every write with a conflict a fixed number of times.
    struct FlakyStore {
        inner: MemoryPollStore,
        conflicts_left: Arc<AtomicU32>,
    }

    impl FlakyStore {
        fn new(conflicts: u32) -> Self {
            Self {
                inner: MemoryPollStore::new(),
                conflicts_left: Arc::new(AtomicU32::new(conflicts)),
            }
        }

        fn conflict(&self) -> bool {
            self.conflicts_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok()
        }
    }

    impl PollStore for FlakyStore {
        fn create_open_poll(
            &self,
            poll: PollEntity,
        ) -> BoxFuture<'static, StorageResult<PollEntity>> {
            if self.conflict() {
                return Box::pin(async {
                    Err(StorageError::Conflict {
                        operation: "creating a poll",
                    })
                });
            }
            self.inner.create_open_poll(poll)
        }

        fn find_open_poll_by_topic(
            &self,
            topic: String,
        ) -> BoxFuture<'static, StorageResult<Option<PollEntity>>> {
            self.inner.find_open_poll_by_topic(topic)
        }

        fn find_poll(&self, id: PollId) -> BoxFuture<'static, StorageResult<Option<PollEntity>>> {
            self.inner.find_poll(id)
        }

        fn upsert_vote(&self, vote: VoteEntity) -> BoxFuture<'static, StorageResult<()>> {
            if self.conflict() {
                return Box::pin(async {
                    Err(StorageError::Conflict {
                        operation: "recording a vote",
                    })
                });
            }
            self.inner.upsert_vote(vote)
        }

        fn list_votes(&self, poll_id: PollId) -> BoxFuture<'static, StorageResult<Vec<VoteEntity>>> {
            self.inner.list_votes(poll_id)
        }

        fn close_poll(&self, id: PollId) -> BoxFuture<'static, StorageResult<ClosedPollEntity>> {
            if self.conflict() {
                return Box::pin(async {
                    Err(StorageError::Conflict {
                        operation: "closing a poll",
                    })
                });
            }
            self.inner.close_poll(id)
        }

        fn list_open_polls(&self) -> BoxFuture<'static, StorageResult<Vec<PollEntity>>> {
            self.inner.list_open_polls()
        }

        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.health_check()
        }

        fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.try_reconnect()
        }
    }

    #[tokio::test]
    async fn conflicts_are_retried_within_the_attempt_budget() {
        let (scheduler, _fired) = Scheduler::new();
        let store = Arc::new(FlakyStore::new(2));
        let lifecycle = PollLifecycle::new(store.clone(), 3);

        let poll = lifecycle
            .start(&scheduler, "lunch", minutes("10"), "alice")
            .await
            .unwrap();

        store.conflicts_left.store(2, Ordering::SeqCst);
        lifecycle.cast_vote("lunch", "bob", "sushi").await.unwrap();

        store.conflicts_left.store(2, Ordering::SeqCst);
        assert!(matches!(
            lifecycle.close(poll.id).await.unwrap(),
            CloseOutcome::Closed(_)
        ));
    }

    #[tokio::test]
    async fn failed_close_leaves_the_poll_open() {
        let (scheduler, _fired) = Scheduler::new();
        let store = Arc::new(FlakyStore::new(0));
        let lifecycle = PollLifecycle::new(store.clone(), 2);

        let poll = lifecycle
            .start(&scheduler, "lunch", minutes("10"), "alice")
            .await
            .unwrap();
        lifecycle.cast_vote("lunch", "bob", "sushi").await.unwrap();

        store.conflicts_left.store(2, Ordering::SeqCst);
        let err = lifecycle.close(poll.id).await.unwrap_err();
        assert!(matches!(err, PollError::Storage(StorageError::Conflict { .. })));
        assert!(open_poll(&lifecycle, "lunch").await.is_some());

        let CloseOutcome::Closed(closed) = lifecycle.close(poll.id).await.unwrap() else {
            panic!("retry should close the poll");
        };
        assert_eq!(closed.tally.total_votes(), 1);
    }
}

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Identifier assigned to a poll when it is opened.
pub type PollId = Uuid;

/// Open poll as persisted by the storage backends.
///
/// A poll only exists in storage while it is open: closing it removes the record
/// together with every vote cast on it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollEntity {
    /// Stable identifier for the poll.
    pub id: PollId,
    /// Topic users vote on; unique among open polls (exact, case-sensitive match).
    pub topic: String,
    /// Instant the poll was opened.
    pub created_at: SystemTime,
    /// Instant the poll expires (`created_at` + duration).
    pub end_time: SystemTime,
}

impl PollEntity {
    /// Build a fresh open poll starting at `created_at` and lasting `duration`.
    pub fn open(topic: impl Into<String>, duration: Duration, created_at: SystemTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            created_at,
            end_time: created_at + duration,
        }
    }

    /// Whether the poll end time has been reached at `now`.
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        self.end_time <= now
    }
}

/// Single user's current choice on an open poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteEntity {
    /// Poll the vote belongs to (lookup key only).
    pub poll_id: PollId,
    /// Identifier of the voting user.
    pub user: String,
    /// Free-text option chosen by the user.
    pub option: String,
    /// Instant the (latest) vote was cast.
    pub cast_at: SystemTime,
}

/// Snapshot of a poll taken at the moment it was removed from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedPollEntity {
    /// The poll record that was deleted.
    pub poll: PollEntity,
    /// Votes held by the poll at deletion time.
    pub votes: Vec<VoteEntity>,
}

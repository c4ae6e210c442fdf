//! One-shot expiry timers for open polls.

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime},
};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::{
    sync::mpsc,
    task::AbortHandle,
    time::{Instant, sleep_until},
};
use tracing::debug;

use crate::dao::models::PollId;

struct ArmedTimer {
    generation: u64,
    fire_at: SystemTime,
    abort: AbortHandle,
}

type TimerMap = DashMap<PollId, ArmedTimer>;

/// Owns the armed expiry timers, at most one per poll.
///
/// A timer never closes the poll itself: when it fires, the poll id is pushed onto
/// the expiry channel returned by [`Scheduler::new`] and the timer is forgotten.
pub struct Scheduler {
    timers: Arc<TimerMap>,
    fired: mpsc::UnboundedSender<PollId>,
    generation: AtomicU64,
}

/// Handle to a single armed timer.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    poll_id: PollId,
    generation: u64,
    timers: Weak<TimerMap>,
}

impl Scheduler {
    /// Create a scheduler together with the receiving end of its expiry channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PollId>) {
        let (fired, receiver) = mpsc::unbounded_channel();
        let scheduler = Self {
            timers: Arc::new(DashMap::new()),
            fired,
            generation: AtomicU64::new(0),
        };
        (scheduler, receiver)
    }

    /// Fire `poll_id` at `fire_at`, immediately when that instant has already passed.
    ///
    /// Any timer previously armed for the same poll is replaced.
    pub fn arm(&self, poll_id: PollId, fire_at: SystemTime) -> TimerHandle {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let delay = fire_at
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO);
        let deadline = Instant::now() + delay;

        // The entry stays locked until the timer is registered, so a task firing right
        // away cannot look for its registration before it exists.
        let entry = self.timers.entry(poll_id);
        let timers = Arc::downgrade(&self.timers);
        let fired = self.fired.clone();
        let task = tokio::spawn(async move {
            sleep_until(deadline).await;
            let Some(timers) = timers.upgrade() else {
                return;
            };
            if timers
                .remove_if(&poll_id, |_, timer| timer.generation == generation)
                .is_some()
            {
                debug!(%poll_id, "poll timer fired");
                let _ = fired.send(poll_id);
            }
        });

        let timer = ArmedTimer {
            generation,
            fire_at,
            abort: task.abort_handle(),
        };
        match entry {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.insert(timer);
                previous.abort.abort();
            }
            Entry::Vacant(vacant) => {
                vacant.insert(timer);
            }
        }

        TimerHandle {
            poll_id,
            generation,
            timers: Arc::downgrade(&self.timers),
        }
    }

    /// Disarm the timer of `poll_id`, returning whether one was pending.
    pub fn cancel(&self, poll_id: PollId) -> bool {
        match self.timers.remove(&poll_id) {
            Some((_, timer)) => {
                timer.abort.abort();
                true
            }
            None => false,
        }
    }

    /// Whether a timer is pending for `poll_id`.
    pub fn is_armed(&self, poll_id: PollId) -> bool {
        self.timers.contains_key(&poll_id)
    }

    /// Instant the pending timer of `poll_id` is due at.
    pub fn fire_at(&self, poll_id: PollId) -> Option<SystemTime> {
        self.timers.get(&poll_id).map(|timer| timer.fire_at)
    }

    /// Number of pending timers.
    pub fn armed_count(&self) -> usize {
        self.timers.len()
    }
}

impl TimerHandle {
    /// Disarm the timer unless it already fired or was replaced by a newer one.
    pub fn cancel(&self) -> bool {
        let Some(timers) = self.timers.upgrade() else {
            return false;
        };
        match timers.remove_if(&self.poll_id, |_, timer| timer.generation == self.generation) {
            Some((_, timer)) => {
                timer.abort.abort();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn in_secs(secs: u64) -> SystemTime {
        SystemTime::now() + Duration::from_secs(secs)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_the_deadline() {
        let (scheduler, mut fired) = Scheduler::new();
        let poll_id = Uuid::new_v4();

        scheduler.arm(poll_id, in_secs(60));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(fired.try_recv().is_err());
        assert!(scheduler.is_armed(poll_id));

        assert_eq!(fired.recv().await, Some(poll_id));
        assert!(!scheduler.is_armed(poll_id));
        assert_eq!(scheduler.armed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn past_deadline_fires_immediately() {
        let (scheduler, mut fired) = Scheduler::new();
        let poll_id = Uuid::new_v4();

        scheduler.arm(poll_id, SystemTime::now() - Duration::from_secs(3600));

        assert_eq!(fired.recv().await, Some(poll_id));
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_the_pending_timer() {
        let (scheduler, mut fired) = Scheduler::new();
        let poll_id = Uuid::new_v4();

        let first = scheduler.arm(poll_id, in_secs(10));
        scheduler.arm(poll_id, in_secs(120));
        assert_eq!(scheduler.armed_count(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(fired.try_recv().is_err());
        // the replaced handle no longer controls anything
        assert!(!first.cancel());

        assert_eq!(fired.recv().await, Some(poll_id));
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(fired.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timers_never_fire() {
        let (scheduler, mut fired) = Scheduler::new();
        let by_id = Uuid::new_v4();
        let by_handle = Uuid::new_v4();

        scheduler.arm(by_id, in_secs(5));
        let handle = scheduler.arm(by_handle, in_secs(5));

        assert!(scheduler.cancel(by_id));
        assert!(!scheduler.cancel(by_id));
        assert!(handle.cancel());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(fired.try_recv().is_err());
        assert_eq!(scheduler.armed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn independent_polls_fire_in_deadline_order() {
        let (scheduler, mut fired) = Scheduler::new();
        let late = Uuid::new_v4();
        let early = Uuid::new_v4();

        scheduler.arm(late, in_secs(20));
        scheduler.arm(early, in_secs(10));
        assert!(scheduler.fire_at(late).is_some());

        assert_eq!(fired.recv().await, Some(early));
        assert_eq!(fired.recv().await, Some(late));
    }
}

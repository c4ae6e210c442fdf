//! Closing polls whose timer fired, and re-arming timers from storage.

use std::{sync::Arc, time::SystemTime};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    dao::{models::PollId, poll_store::PollStore},
    error::ServiceError,
    services::announcer::PollResults,
    state::{
        SharedState,
        lifecycle::{CloseOutcome, PollLifecycle},
    },
};

/// Spawn the worker consuming fired timers, one close task per poll.
///
/// Returns `None` when the expiry channel was already taken by another worker.
pub async fn spawn_worker(state: SharedState) -> Option<JoinHandle<()>> {
    let mut expirations = state.take_expirations().await?;
    Some(tokio::spawn(async move {
        while let Some(poll_id) = expirations.recv().await {
            let state = state.clone();
            tokio::spawn(async move {
                expire(&state, poll_id).await;
            });
        }
        debug!("expiry channel closed; worker stopping");
    }))
}

async fn expire(state: &SharedState, poll_id: PollId) {
    if let Err(err) = close_and_announce(state, poll_id).await {
        let retry_at = SystemTime::now() + state.config().close_retry_delay;
        warn!(
            %poll_id,
            error = %err,
            retry_in_ms = state.config().close_retry_delay.as_millis() as u64,
            "failed to close expired poll; retrying later"
        );
        state.scheduler().arm(poll_id, retry_at);
    }
}

/// Close `poll_id` and announce its results, unless someone else closed it first.
///
/// Results are announced by the caller that actually closed the poll, so each poll is
/// announced at most once whatever the number of concurrent triggers.
pub async fn close_and_announce(
    state: &SharedState,
    poll_id: PollId,
) -> Result<Option<PollResults>, ServiceError> {
    let lifecycle = state.lifecycle().await?;
    match lifecycle.close(poll_id).await? {
        CloseOutcome::Closed(closed) => {
            let results = PollResults::new(&closed, state.config().results_limit);
            state.announcer().announce_results(&results);
            info!(%poll_id, topic = %results.topic, "poll results announced");
            Ok(Some(results))
        }
        CloseOutcome::NoOp => Ok(None),
    }
}

/// Arm a timer for every poll still open in `store`, returning how many were armed.
///
/// Polls whose end time passed while the service was down fire immediately. Timers
/// already pending for their poll's end time are left alone.
pub async fn rearm_open_polls(
    state: &SharedState,
    store: Arc<dyn PollStore>,
) -> Result<usize, ServiceError> {
    let lifecycle = PollLifecycle::new(store, state.config().max_store_attempts);
    let polls = lifecycle.open_polls().await?;
    let now = SystemTime::now();

    let mut armed = 0;
    for poll in &polls {
        // still armed from before a reconnect
        if state.scheduler().fire_at(poll.id) == Some(poll.end_time) {
            continue;
        }
        if poll.is_expired_at(now) {
            debug!(poll_id = %poll.id, topic = %poll.topic, "open poll already expired");
        }
        state.scheduler().arm(poll.id, poll.end_time);
        armed += 1;
    }

    info!(open = polls.len(), armed, "re-armed open poll timers");
    Ok(armed)
}

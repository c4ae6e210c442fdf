use tracing::info;

use crate::{
    dao::models::PollId,
    dto::poll::{ClosedPollResponse, PollDetails, PollResultsDto, PollSummary, StandingDto},
    error::ServiceError,
    services::expiry_service,
    state::SharedState,
};

/// List every open poll.
pub async fn list_open_polls(state: &SharedState) -> Result<Vec<PollSummary>, ServiceError> {
    let lifecycle = state.lifecycle().await?;
    let polls = lifecycle.open_polls().await?;
    Ok(polls.iter().map(PollSummary::from).collect())
}

/// Fetch an open poll with its current standings.
pub async fn get_poll(state: &SharedState, id: PollId) -> Result<PollDetails, ServiceError> {
    let lifecycle = state.lifecycle().await?;
    let poll = lifecycle
        .find_poll(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("poll `{id}` is not open")))?;
    let tally = lifecycle.current_tally(id).await?;

    Ok(PollDetails {
        poll: PollSummary::from(&poll),
        standings: tally.standings().iter().map(StandingDto::from).collect(),
    })
}

/// Close a poll ahead of its deadline and announce its results.
///
/// Closing an already closed poll succeeds with `closed: false`.
pub async fn force_close(
    state: &SharedState,
    id: PollId,
) -> Result<ClosedPollResponse, ServiceError> {
    let results = expiry_service::close_and_announce(state, id).await?;
    if results.is_some() {
        state.scheduler().cancel(id);
        info!(poll_id = %id, "poll closed by an administrator");
    }

    Ok(ClosedPollResponse {
        closed: results.is_some(),
        results: results.as_ref().map(PollResultsDto::from),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::poll_store::memory::MemoryPollStore,
        state::{
            AppState,
            lifecycle::{MAX_POLL_MINUTES, PollDuration},
        },
    };

    async fn state_with_poll() -> (SharedState, PollId) {
        let state = AppState::new(AppConfig::default());
        state.set_poll_store(Arc::new(MemoryPollStore::new())).await;
        let lifecycle = state.lifecycle().await.unwrap();
        let poll = lifecycle
            .start(
                state.scheduler(),
                "movie night",
                PollDuration::from_minutes("30").unwrap(),
                "alice",
            )
            .await
            .unwrap();
        for (user, option) in [("alice", "alien"), ("bob", "heat"), ("carol", "alien")] {
            lifecycle.cast_vote("movie night", user, option).await.unwrap();
        }
        (state, poll.id)
    }

    #[tokio::test]
    async fn details_include_the_standings() {
        let (state, id) = state_with_poll().await;

        let details = get_poll(&state, id).await.unwrap();
        assert_eq!(details.poll.topic, "movie night");
        assert_eq!(details.standings[0].option, "alien");
        assert_eq!(details.standings[0].votes, 2);
        assert_eq!(list_open_polls(&state).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn longest_poll_is_listed_with_its_deadline() {
        let state = AppState::new(AppConfig::default());
        state.set_poll_store(Arc::new(MemoryPollStore::new())).await;
        let lifecycle = state.lifecycle().await.unwrap();
        let duration = PollDuration::from_minutes(&MAX_POLL_MINUTES.to_string()).unwrap();
        lifecycle
            .start(state.scheduler(), "century", duration, "alice")
            .await
            .unwrap();

        let polls = list_open_polls(&state).await.unwrap();
        assert_eq!(polls.len(), 1);
        assert_ne!(polls[0].end_time, "invalid-timestamp");
    }

    #[tokio::test]
    async fn force_close_cancels_the_timer_once() {
        let (state, id) = state_with_poll().await;
        assert!(state.scheduler().is_armed(id));

        let first = force_close(&state, id).await.unwrap();
        assert!(first.closed);
        assert_eq!(first.results.unwrap().standings.len(), 2);
        assert!(!state.scheduler().is_armed(id));

        let second = force_close(&state, id).await.unwrap();
        assert!(!second.closed);
        assert!(second.results.is_none());

        let err = get_poll(&state, id).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert!(list_open_polls(&state).await.unwrap().is_empty());
    }
}

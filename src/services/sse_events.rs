use serde::Serialize;
use tracing::warn;

use crate::{
    dao::models::PollEntity,
    dto::{
        format_system_time,
        sse::{PollStartedEvent, ServerEvent, SystemStatus},
    },
    state::{SharedState, SseHub},
};

pub const EVENT_POLL_STARTED: &str = "poll.started";
pub const EVENT_POLL_CLOSED: &str = "poll.closed";
pub const EVENT_SYSTEM_STATUS: &str = "system.status";

/// Broadcast that `initiator` opened `poll`.
pub fn broadcast_poll_started(state: &SharedState, poll: &PollEntity, initiator: &str) {
    let payload = PollStartedEvent {
        poll_id: poll.id,
        topic: poll.topic.clone(),
        initiator: initiator.to_owned(),
        end_time: format_system_time(poll.end_time),
    };
    send_event(state.public_sse(), EVENT_POLL_STARTED, &payload);
}

/// Broadcast the degraded flag after it changed.
pub fn broadcast_system_status(hub: &SseHub, degraded: bool) {
    send_event(hub, EVENT_SYSTEM_STATUS, &SystemStatus { degraded });
}

/// Serialise `payload` and broadcast it on `hub` under the `event` name.
pub fn send_event(hub: &SseHub, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => hub.broadcast(event),
        Err(err) => warn!(event, error = %err, "failed to serialize SSE payload"),
    }
}

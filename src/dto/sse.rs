use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dto::poll::StandingDto;

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Identifier of the SSE stream (`public` or `admin`).
    pub stream: String,
    /// Human-readable message confirming the subscription.
    pub message: String,
    /// Whether the backend is running without a storage backend connection.
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Token handed to the admin stream, required by the `/admin` routes.
pub struct AdminHandshake {
    pub token: String,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the backend enters or leaves degraded mode.
pub struct SystemStatus {
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast once per poll, when it closes.
pub struct PollClosedEvent {
    pub poll_id: Uuid,
    pub topic: String,
    /// Best options first, capped to the configured results limit.
    pub standings: Vec<StandingDto>,
    /// Announcement text, one entry per line.
    pub lines: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a poll opens.
pub struct PollStartedEvent {
    pub poll_id: Uuid,
    pub topic: String,
    pub initiator: String,
    pub end_time: String,
}

//! DTOs describing open polls and their standings.

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::PollEntity,
    dto::format_system_time,
    services::announcer::PollResults,
    state::tally::Standing,
};

/// Open poll as listed by `GET /polls`.
#[derive(Debug, Serialize, ToSchema)]
pub struct PollSummary {
    pub id: Uuid,
    pub topic: String,
    /// RFC 3339 timestamp.
    pub created_at: String,
    /// RFC 3339 timestamp at which the poll closes.
    pub end_time: String,
}

impl From<&PollEntity> for PollSummary {
    fn from(poll: &PollEntity) -> Self {
        Self {
            id: poll.id,
            topic: poll.topic.clone(),
            created_at: format_system_time(poll.created_at),
            end_time: format_system_time(poll.end_time),
        }
    }
}

/// Open poll together with its current standings.
#[derive(Debug, Serialize, ToSchema)]
pub struct PollDetails {
    #[serde(flatten)]
    pub poll: PollSummary,
    pub standings: Vec<StandingDto>,
}

/// Vote count for one option.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StandingDto {
    pub option: String,
    pub votes: usize,
}

impl From<&Standing> for StandingDto {
    fn from(standing: &Standing) -> Self {
        Self {
            option: standing.option.clone(),
            votes: standing.votes,
        }
    }
}

/// Results of a poll closed by an administrator.
#[derive(Debug, Serialize, ToSchema)]
pub struct ClosedPollResponse {
    /// `false` when the poll had already been closed.
    pub closed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<PollResultsDto>,
}

/// Announced results of a closed poll.
#[derive(Debug, Serialize, ToSchema)]
pub struct PollResultsDto {
    pub poll_id: Uuid,
    pub topic: String,
    pub standings: Vec<StandingDto>,
    pub lines: Vec<String>,
}

impl From<&PollResults> for PollResultsDto {
    fn from(results: &PollResults) -> Self {
        Self {
            poll_id: results.poll_id,
            topic: results.topic.clone(),
            standings: results.standings.iter().map(StandingDto::from).collect(),
            lines: results.lines.clone(),
        }
    }
}

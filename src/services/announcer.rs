//! Delivery of closed poll results.

use uuid::Uuid;

use crate::{
    dto::{poll::StandingDto, sse::PollClosedEvent},
    services::sse_events::{EVENT_POLL_CLOSED, send_event},
    state::{SseHub, lifecycle::ClosedPoll, tally::Standing},
};

const SEPARATOR: &str = "_______________________________";

/// Results of a closed poll, ready to be announced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResults {
    /// Identifier of the closed poll.
    pub poll_id: Uuid,
    /// Topic of the closed poll.
    pub topic: String,
    /// Best options first, truncated to the display limit.
    pub standings: Vec<Standing>,
    /// Announcement text.
    pub lines: Vec<String>,
}

impl PollResults {
    /// Build the announcement of `closed`, showing at most `limit` options.
    pub fn new(closed: &ClosedPoll, limit: usize) -> Self {
        let standings = closed.tally.top(limit).to_vec();
        let lines = format_results(&closed.poll.topic, &standings);
        Self {
            poll_id: closed.poll.id,
            topic: closed.poll.topic.clone(),
            standings,
            lines,
        }
    }
}

/// Receives the results of every poll exactly once, when it closes.
pub trait Announcer: Send + Sync {
    /// Deliver `results` to the chat.
    fn announce_results(&self, results: &PollResults);
}

impl Announcer for SseHub {
    fn announce_results(&self, results: &PollResults) {
        let payload = PollClosedEvent {
            poll_id: results.poll_id,
            topic: results.topic.clone(),
            standings: results.standings.iter().map(StandingDto::from).collect(),
            lines: results.lines.clone(),
        };
        send_event(self, EVENT_POLL_CLOSED, &payload);
    }
}

/// Render the results table announced in the chat.
pub fn format_results(topic: &str, standings: &[Standing]) -> Vec<String> {
    let mut lines = Vec::with_capacity(standings.len() + 3);
    lines.push(format!("The poll for '{topic}' is over! And the results are:"));
    lines.push(format!("{:^20} | {:^8}", "Option", "Votes"));
    lines.push(SEPARATOR.to_string());
    lines.extend(
        standings
            .iter()
            .map(|standing| format!("{:^20} | {:^8}", standing.option, standing.votes)),
    );
    lines
}

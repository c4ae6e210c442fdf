//! Chat command parsing and dispatch.
//!
//! User mistakes (unknown poll, duplicate topic, bad duration) become reply lines;
//! only storage faults are returned as errors.

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::{
    dto::command::CommandReply,
    error::ServiceError,
    services::sse_events,
    state::{
        SharedState,
        lifecycle::{PollDuration, PollError},
    },
};

static START_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^!?poll "(.+)" "(.+)"$"#).expect("poll command pattern is valid")
});
static VOTE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^!?vote "(.+)" "(.+)"$"#).expect("vote command pattern is valid")
});

const HELP: [&str; 2] = [
    r#"!poll "<topic>" "<duration>" - Start a poll with a given <topic> that lasts <duration> (minutes)."#,
    r#"!vote "<topic>" "<choice>" - Vote on a <topic> with <choice>."#,
];

/// Commands understood by the poll bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// `poll "<topic>" "<minutes>"`
    Start { topic: String, duration: String },
    /// `vote "<topic>" "<option>"`
    CastVote { topic: String, option: String },
}

impl ChatCommand {
    /// Parse a chat message, `None` when it is not a poll command.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Some(captures) = START_PATTERN.captures(text) {
            return Some(Self::Start {
                topic: captures[1].to_owned(),
                duration: captures[2].to_owned(),
            });
        }
        VOTE_PATTERN.captures(text).map(|captures| Self::CastVote {
            topic: captures[1].to_owned(),
            option: captures[2].to_owned(),
        })
    }
}

/// Usage lines returned for anything that is not a command.
pub fn help() -> CommandReply {
    CommandReply {
        lines: HELP.iter().map(|line| line.to_string()).collect(),
    }
}

/// Run the command contained in `text` on behalf of `user`.
pub async fn handle(
    state: &SharedState,
    user: &str,
    text: &str,
) -> Result<CommandReply, ServiceError> {
    let Some(command) = ChatCommand::parse(text) else {
        return Ok(help());
    };

    match command {
        ChatCommand::Start { topic, duration } => start_poll(state, user, &topic, &duration).await,
        ChatCommand::CastVote { topic, option } => cast_vote(state, user, &topic, &option).await,
    }
}

async fn start_poll(
    state: &SharedState,
    user: &str,
    topic: &str,
    duration: &str,
) -> Result<CommandReply, ServiceError> {
    let lifecycle = state.lifecycle().await?;
    let outcome = match PollDuration::from_minutes(duration) {
        Ok(duration) => lifecycle
            .start(state.scheduler(), topic, duration, user)
            .await
            .map(|poll| (poll, duration)),
        Err(err) => Err(err),
    };

    match outcome {
        Ok((poll, duration)) => {
            sse_events::broadcast_poll_started(state, &poll, user);
            Ok(CommandReply::line(format!(
                "{user} has initiated a poll for {topic} that lasts {duration} minutes!"
            )))
        }
        Err(PollError::DuplicateTopic { .. }) => Ok(CommandReply::line(
            "A poll with that topic already exists!",
        )),
        Err(PollError::InvalidDuration { input }) => Ok(CommandReply::line(format!(
            "'{input}' is not a valid number of minutes!"
        ))),
        Err(PollError::InvalidTopic) => {
            Ok(CommandReply::line(format!("{user}, a poll needs a topic!")))
        }
        Err(err) => {
            warn!(topic, user, error = %err, "failed to start poll");
            Err(err.into())
        }
    }
}

async fn cast_vote(
    state: &SharedState,
    user: &str,
    topic: &str,
    option: &str,
) -> Result<CommandReply, ServiceError> {
    let lifecycle = state.lifecycle().await?;
    match lifecycle.cast_vote(topic, user, option).await {
        Ok(receipt) => Ok(CommandReply::line(format!(
            "{user}, your vote for '{}' on '{}' has been cast!",
            receipt.option, receipt.topic
        ))),
        Err(PollError::NoSuchPoll { .. }) => Ok(CommandReply::line(format!(
            "{user}, there is no poll for '{topic}' right now!"
        ))),
        Err(err) => {
            warn!(topic, user, error = %err, "failed to record vote");
            Err(err.into())
        }
    }
}

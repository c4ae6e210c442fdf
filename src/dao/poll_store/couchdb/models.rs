use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dao::models::{ClosedPollEntity, PollEntity, PollId, VoteEntity};

pub const POLL_PREFIX: &str = "poll::";
pub const END_SUFFIX: &str = "\u{ffff}";

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    #[serde(default)]
    pub doc: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct FindResponse {
    pub docs: Vec<Value>,
}

/// One document per open poll, keyed by topic so that creating a second poll for
/// the same topic is rejected by CouchDB itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchPollDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub poll_id: PollId,
    pub topic: String,
    pub created_at: SystemTime,
    pub end_time: SystemTime,
    #[serde(default)]
    pub votes: Vec<CouchVoteBody>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchVoteBody {
    pub user: String,
    pub option: String,
    pub cast_at: SystemTime,
}

impl From<PollEntity> for CouchPollDocument {
    fn from(poll: PollEntity) -> Self {
        Self {
            id: poll_doc_id(&poll.topic),
            rev: None,
            poll_id: poll.id,
            topic: poll.topic,
            created_at: poll.created_at,
            end_time: poll.end_time,
            votes: Vec::new(),
        }
    }
}

impl CouchPollDocument {
    pub fn to_entity(&self) -> PollEntity {
        PollEntity {
            id: self.poll_id,
            topic: self.topic.clone(),
            created_at: self.created_at,
            end_time: self.end_time,
        }
    }

    pub fn into_votes(self) -> Vec<VoteEntity> {
        let poll_id = self.poll_id;
        self.votes
            .into_iter()
            .map(|vote| VoteEntity {
                poll_id,
                user: vote.user,
                option: vote.option,
                cast_at: vote.cast_at,
            })
            .collect()
    }

    pub fn into_closed(self) -> ClosedPollEntity {
        let poll = self.to_entity();
        ClosedPollEntity {
            poll,
            votes: self.into_votes(),
        }
    }

    /// Replace `vote.user`'s previous vote, appending the new one last.
    pub fn record_vote(&mut self, vote: VoteEntity) {
        self.votes.retain(|existing| existing.user != vote.user);
        self.votes.push(CouchVoteBody {
            user: vote.user,
            option: vote.option,
            cast_at: vote.cast_at,
        });
    }
}

pub fn poll_doc_id(topic: &str) -> String {
    format!("{POLL_PREFIX}{topic}")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn record_vote_replaces_previous_choice() {
        let poll = PollEntity::open("lunch", Duration::from_secs(60), SystemTime::now());
        let mut doc = CouchPollDocument::from(poll.clone());
        assert_eq!(doc.id, "poll::lunch");

        for (user, option) in [("alice", "tacos"), ("bob", "sushi"), ("alice", "ramen")] {
            doc.record_vote(VoteEntity {
                poll_id: poll.id,
                user: user.into(),
                option: option.into(),
                cast_at: SystemTime::now(),
            });
        }

        let closed = doc.into_closed();
        assert_eq!(closed.poll, poll);
        let summary: Vec<_> = closed
            .votes
            .iter()
            .map(|v| (v.user.as_str(), v.option.as_str()))
            .collect();
        assert_eq!(summary, vec![("bob", "sushi"), ("alice", "ramen")]);
    }
}

use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{MongoDaoError, MongoResult};
use crate::dao::models::{ClosedPollEntity, PollEntity, PollId, VoteEntity};

/// One document per open poll, votes embedded so that every write on a poll is a
/// single-document (hence atomic) operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoPollDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub topic: String,
    pub created_at: DateTime,
    pub end_time: DateTime,
    #[serde(default)]
    pub votes: Vec<MongoVoteDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoVoteDocument {
    pub user: String,
    pub option: String,
    pub cast_at: DateTime,
}

impl From<PollEntity> for MongoPollDocument {
    fn from(value: PollEntity) -> Self {
        Self {
            id: value.id.to_string(),
            topic: value.topic,
            created_at: DateTime::from_system_time(value.created_at),
            end_time: DateTime::from_system_time(value.end_time),
            votes: Vec::new(),
        }
    }
}

impl MongoPollDocument {
    fn poll_id(&self) -> MongoResult<PollId> {
        Uuid::parse_str(&self.id).map_err(|source| MongoDaoError::InvalidPollId {
            id: self.id.clone(),
            source,
        })
    }

    pub fn into_entity(self) -> MongoResult<PollEntity> {
        Ok(self.into_closed()?.poll)
    }

    pub fn into_votes(self) -> MongoResult<Vec<VoteEntity>> {
        Ok(self.into_closed()?.votes)
    }

    pub fn into_closed(self) -> MongoResult<ClosedPollEntity> {
        let id = self.poll_id()?;
        let votes = self
            .votes
            .into_iter()
            .map(|vote| vote.into_entity(id))
            .collect();

        Ok(ClosedPollEntity {
            poll: PollEntity {
                id,
                topic: self.topic,
                created_at: self.created_at.to_system_time(),
                end_time: self.end_time.to_system_time(),
            },
            votes,
        })
    }
}

impl MongoVoteDocument {
    fn into_entity(self, poll_id: PollId) -> VoteEntity {
        VoteEntity {
            poll_id,
            user: self.user,
            option: self.option,
            cast_at: self.cast_at.to_system_time(),
        }
    }
}

pub fn doc_id(id: PollId) -> Document {
    doc! {"_id": id.to_string()}
}

/// Projection dropping the embedded votes when only the poll record is needed.
pub fn without_votes() -> Document {
    doc! {"votes": 0}
}

/// Update pipeline replacing `vote.user`'s previous vote (if any) with `vote`.
///
/// User-provided strings go through `$literal` so values starting with `$` are never
/// interpreted as field paths.
pub fn upsert_vote_pipeline(vote: &VoteEntity) -> Vec<Document> {
    let cast_at = DateTime::from_system_time(vote.cast_at);
    vec![doc! {
        "$set": {
            "votes": {
                "$concatArrays": [
                    {
                        "$filter": {
                            "input": { "$ifNull": ["$votes", []] },
                            "cond": { "$ne": ["$$this.user", { "$literal": vote.user.as_str() }] }
                        }
                    },
                    [
                        {
                            "user": { "$literal": vote.user.as_str() },
                            "option": { "$literal": vote.option.as_str() },
                            "cast_at": cast_at
                        }
                    ]
                ]
            }
        }
    }]
}

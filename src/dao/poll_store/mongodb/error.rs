use mongodb::error::Error as MongoError;
use thiserror::Error;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Failures that can occur while interacting with MongoDB.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("missing MongoDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("an open poll already exists for topic `{topic}`")]
    DuplicateTopic { topic: String },
    #[error("write conflict while {operation}")]
    WriteConflict {
        operation: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to create poll for topic `{topic}`")]
    CreatePoll {
        topic: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to load poll `{key}`")]
    LoadPoll {
        key: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to record vote on poll `{poll_id}`")]
    SaveVote {
        poll_id: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to close poll `{poll_id}`")]
    ClosePoll {
        poll_id: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to list open polls")]
    ListPolls {
        #[source]
        source: MongoError,
    },
    #[error("stored poll has an invalid identifier `{id}`")]
    InvalidPollId {
        id: String,
        #[source]
        source: uuid::Error,
    },
}

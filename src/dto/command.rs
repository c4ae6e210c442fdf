//! DTOs of the chat command endpoint.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::dto::validation::validate_not_blank;

/// A chat message addressed to the poll bot.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CommandRequest {
    /// Name of the chat user sending the message.
    #[validate(custom(function = "validate_not_blank"))]
    pub user: String,
    /// Raw message text, e.g. `poll "lunch" "10"`.
    #[validate(custom(function = "validate_not_blank"))]
    pub text: String,
}

/// Lines the bot replies with.
#[derive(Debug, Serialize, ToSchema)]
pub struct CommandReply {
    pub lines: Vec<String>,
}

impl CommandReply {
    /// Single-line reply.
    pub fn line(line: impl Into<String>) -> Self {
        Self {
            lines: vec![line.into()],
        }
    }
}

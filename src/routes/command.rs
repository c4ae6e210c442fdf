use axum::{Json, Router, extract::State, routing::post};
use axum_valid::Valid;

use crate::{
    dto::command::{CommandReply, CommandRequest},
    error::AppError,
    services::command_service,
    state::SharedState,
};

#[utoipa::path(
    post,
    path = "/commands",
    tag = "commands",
    request_body = CommandRequest,
    responses(
        (status = 200, description = "Reply of the poll bot", body = CommandReply),
        (status = 400, description = "Blank user or text"),
        (status = 503, description = "Storage unavailable")
    )
)]
/// Run a chat command (`poll "<topic>" "<minutes>"` or `vote "<topic>" "<option>"`).
pub async fn post_command(
    State(state): State<SharedState>,
    Valid(Json(request)): Valid<Json<CommandRequest>>,
) -> Result<Json<CommandReply>, AppError> {
    let reply = command_service::handle(&state, request.user.trim(), &request.text).await?;
    Ok(Json(reply))
}

/// Configure the chat command route.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/commands", post(post_command))
}

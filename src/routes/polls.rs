use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use uuid::Uuid;

use crate::{
    dto::poll::{PollDetails, PollSummary},
    error::AppError,
    services::poll_service,
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/polls",
    tag = "polls",
    responses((status = 200, description = "Open polls", body = [PollSummary]))
)]
/// List the polls currently open.
pub async fn list_polls(
    State(state): State<SharedState>,
) -> Result<Json<Vec<PollSummary>>, AppError> {
    Ok(Json(poll_service::list_open_polls(&state).await?))
}

#[utoipa::path(
    get,
    path = "/polls/{id}",
    tag = "polls",
    params(("id" = String, Path, description = "Identifier of the poll")),
    responses(
        (status = 200, description = "Open poll and its standings", body = PollDetails),
        (status = 404, description = "Poll not open")
    )
)]
/// Retrieve an open poll with its current standings.
pub async fn get_poll(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PollDetails>, AppError> {
    Ok(Json(poll_service::get_poll(&state, id).await?))
}

/// Configure the public poll routes.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/polls", get(list_polls))
        .route("/polls/{id}", get(get_poll))
}

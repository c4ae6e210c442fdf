use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::post,
};
use uuid::Uuid;

use crate::{
    dto::poll::ClosedPollResponse, error::AppError, services::poll_service, state::SharedState,
};

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Admin-only poll management endpoints.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/admin/polls/{id}/close", post(close_poll))
        .route_layer(middleware::from_fn_with_state(state, require_admin_token))
}

/// Close a poll before its deadline and announce the results.
#[utoipa::path(
    post,
    path = "/admin/polls/{id}/close",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Admin token issued by the /sse/admin stream"),
    ("id" = String, Path, description = "Identifier of the poll to close")),
    responses((status = 200, description = "Poll closed, or already closed", body = ClosedPollResponse))
)]
pub async fn close_poll(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ClosedPollResponse>, AppError> {
    Ok(Json(poll_service::force_close(&state, id).await?))
}

async fn require_admin_token(
    State(state): State<SharedState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let provided = req
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_owned())
        .ok_or_else(|| {
            AppError::Unauthorized("missing admin token header `X-Admin-Token`".into())
        })?;

    let expected = {
        let guard = state.admin_token().lock().await;
        guard.clone()
    };

    match expected {
        Some(token) if token == provided => Ok(next.run(req).await),
        Some(_) => Err(AppError::Unauthorized("invalid admin token".into())),
        None => Err(AppError::Unauthorized(
            "admin SSE stream not initialised yet".into(),
        )),
    }
}

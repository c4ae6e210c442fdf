use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Chat Poll Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::public_stream,
        crate::routes::sse::admin_stream,
        crate::routes::command::post_command,
        crate::routes::polls::list_polls,
        crate::routes::polls::get_poll,
        crate::routes::admin::close_poll,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::command::CommandRequest,
            crate::dto::command::CommandReply,
            crate::dto::poll::PollSummary,
            crate::dto::poll::PollDetails,
            crate::dto::poll::StandingDto,
            crate::dto::poll::ClosedPollResponse,
            crate::dto::poll::PollResultsDto,
            crate::dto::sse::Handshake,
            crate::dto::sse::AdminHandshake,
            crate::dto::sse::SystemStatus,
            crate::dto::sse::PollStartedEvent,
            crate::dto::sse::PollClosedEvent,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "commands", description = "Chat commands addressed to the poll bot"),
        (name = "polls", description = "Open polls and their standings"),
        (name = "admin", description = "Administrative poll operations"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/healthcheck",
            "/sse/public",
            "/sse/admin",
            "/commands",
            "/polls",
            "/polls/{id}",
            "/admin/polls/{id}/close",
        ] {
            assert!(doc.paths.paths.contains_key(path), "{path}");
        }
    }
}

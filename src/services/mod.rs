/// Delivery of closed poll results.
pub mod announcer;
/// Chat command parsing and dispatch.
pub mod command_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Poll expiry worker and timer recovery.
pub mod expiry_service;
/// Health check service.
pub mod health_service;
/// Read and administrative operations on open polls.
pub mod poll_service;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events broadcasting service.
pub mod sse_service;
/// Storage connection supervisor driving degraded mode.
pub mod storage_supervisor;

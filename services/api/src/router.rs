//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, WebSocket endpoint, and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        ApprovalView, ApprovePayload, CorrectionView, ErrorResponse, LiveSessionSummary,
        RejectPayload,
    },
    state::AppState,
    ws::ws_handler,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::list_sessions,
        handlers::get_approval,
        handlers::approve,
        handlers::reject,
        handlers::list_corrections,
    ),
    components(
        schemas(LiveSessionSummary, ApprovalView, ApprovePayload, RejectPayload, CorrectionView, ErrorResponse)
    ),
    tags(
        (name = "Voice Relay API", description = "Live relay sessions, instruction approval and correction history")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/sessions", get(handlers::list_sessions))
        .route("/sessions/{id}/approval", get(handlers::get_approval))
        .route("/sessions/{id}/approval/approve", post(handlers::approve))
        .route("/sessions/{id}/approval/reject", post(handlers::reject))
        .route("/corrections", get(handlers::list_corrections))
        .route("/ws", get(ws_handler))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}

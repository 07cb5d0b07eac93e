//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, WebSocket endpoint, and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        ErrorResponse, ExerciseStateView, HealthResponse, MessageView, ScoresView, SessionDetail,
        SessionSummary,
    },
    state::AppState,
    ws::ws_handler,
};

use axum::{Router, routing::get};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::list_sessions,
        handlers::get_session,
        handlers::get_transcript,
    ),
    components(
        schemas(HealthResponse, SessionSummary, SessionDetail, ExerciseStateView, ScoresView, MessageView, ErrorResponse)
    ),
    tags(
        (name = "DESC API", description = "Live sessions of the DESC roleplay trainer")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route("/health", get(handlers::health))
        .route("/sessions", get(handlers::list_sessions))
        .route("/sessions/{id}", get(handlers::get_session))
        .route("/sessions/{id}/transcript", get(handlers::get_transcript))
        .route("/ws", get(ws_handler))
        // Apply the state ONLY to this group of routes.
        .with_state(app_state);

    // Create the final router that merges the stateful routes
    // with the stateless routes (like Swagger UI).
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}

//! Axum Handlers for the REST API
//!
//! Read-only inspection of the live sessions. It uses `utoipa` doc comments to
//! generate OpenAPI documentation.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    models::{ErrorResponse, HealthResponse, SessionDetail, SessionSummary},
    state::AppState,
};

pub enum ApiError {
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
        }
    }
}

fn not_found(id: Uuid) -> ApiError {
    ApiError::NotFound(format!("Session with id '{}' not found", id))
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        live_sessions: state.sessions.len().await,
    })
}

/// List the sessions whose WebSocket is open.
#[utoipa::path(
    get,
    path = "/sessions",
    responses(
        (status = 200, description = "List of live sessions", body = [SessionSummary])
    )
)]
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<SessionSummary>> {
    let mut summaries = Vec::new();
    for live in state.sessions.list().await {
        let snapshot = live.session.snapshot().await;
        summaries.push(SessionSummary::new(live.connected_at, &snapshot));
    }
    Json(summaries)
}

/// Get the exercise state, scores and conversation of a live session.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    responses(
        (status = 200, description = "Session details", body = SessionDetail),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let live = state.sessions.get(id).await.ok_or_else(|| not_found(id))?;
    let snapshot = live.session.snapshot().await;
    Ok((StatusCode::OK, Json(SessionDetail::new(live.connected_at, &snapshot))))
}

/// Export the conversation of a live session as plain text.
#[utoipa::path(
    get,
    path = "/sessions/{id}/transcript",
    responses(
        (status = 200, description = "Plain-text transcript", body = String, content_type = "text/plain"),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn get_transcript(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<String, ApiError> {
    let live = state.sessions.get(id).await.ok_or_else(|| not_found(id))?;
    Ok(live.session.transcript().await)
}

//! Session inspection endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use super::routes::AppState;
use super::types::{ChangesResponse, SessionsResponse};

pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<SessionsResponse> {
    Json(SessionsResponse {
        sessions: state.sessions.session_ids().await,
    })
}

/// Change log of one session, oldest first.
pub async fn session_changes(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ChangesResponse>, (StatusCode, String)> {
    if !state.sessions.session_ids().await.contains(&id) {
        return Err((StatusCode::NOT_FOUND, format!("Session {} not found", id)));
    }
    let changes = state.sessions.change_log(&id).await;
    Ok(Json(ChangesResponse {
        session_id: id,
        changes,
    }))
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    if state.sessions.clear_session(&id).await {
        tracing::info!(session_id = %id, "Session cleared");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, format!("Session {} not found", id)))
    }
}

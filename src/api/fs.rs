//! Workspace sync endpoints used by the editor client.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};

use super::routes::AppState;
use super::types::{FilesResponse, MessageResponse, SaveFilesRequest};
use crate::patch::normalize_path;

/// Write the client's files into the workspace.
///
/// Every name is checked before anything is written, so one unsafe name
/// rejects the whole batch.
pub async fn save_files(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SaveFilesRequest>,
) -> Result<Json<MessageResponse>, (StatusCode, String)> {
    let root = state.workspace.root();
    let mut targets = Vec::with_capacity(req.files.len());
    for file in &req.files {
        let name = normalize_path(root, &file.name).map_err(|e| {
            tracing::warn!(name = %file.name, error = %e, "Rejected file sync");
            (
                StatusCode::BAD_REQUEST,
                format!("Invalid file name '{}': {}", file.name, e),
            )
        })?;
        if !state.workspace.is_contained(&name).await {
            tracing::warn!(name = %file.name, "Rejected file sync through symlink");
            return Err((
                StatusCode::BAD_REQUEST,
                format!("Invalid file name '{}': path leaves the workspace", file.name),
            ));
        }
        targets.push((name, file.content.as_str()));
    }

    for (name, content) in &targets {
        state.workspace.write(name, content).await.map_err(|e| {
            tracing::error!(path = %name, error = %e, "Failed to sync file");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;
    }

    tracing::debug!(count = targets.len(), "Synced workspace files");
    Ok(Json(MessageResponse {
        message: format!("Synced {} files", targets.len()),
    }))
}

/// Every text file in the workspace with its content.
pub async fn list_workspace_files(
    State(state): State<Arc<AppState>>,
) -> Result<Json<FilesResponse>, (StatusCode, String)> {
    let files = state.workspace.read_all(None).await.map_err(|e| {
        tracing::error!("Error listing workspace files: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to list files".to_string(),
        )
    })?;
    Ok(Json(FilesResponse { files }))
}

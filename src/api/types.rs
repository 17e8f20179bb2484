//! API request and response types.

use serde::{Deserialize, Serialize};

use crate::session::ChangeLogEntry;
use crate::workspace::WorkspaceFile;

/// One prior message of the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    #[serde(default)]
    pub role: String,
    pub content: String,
}

/// Request to run one agent turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Session to continue; a new one is created when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default)]
    pub messages: Vec<IncomingMessage>,

    /// Files the client wants in the model's context
    #[serde(default)]
    pub files: Vec<WorkspaceFile>,
}

impl ChatRequest {
    /// All message contents joined by newlines, oldest first.
    pub fn user_message(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveFilesRequest {
    pub files: Vec<WorkspaceFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesResponse {
    pub files: Vec<WorkspaceFile>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsResponse {
    pub sessions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangesResponse {
    pub session_id: String,
    pub changes: Vec<ChangeLogEntry>,
}

//! HTTP API for the IDE agent.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Health check
//! - `POST /api/chat` - Run an agent turn, streaming events as NDJSON
//! - `POST /api/save-files` - Sync client files into the workspace
//! - `GET /api/list-workspace-files` - Every workspace file with its content
//! - `GET /api/sessions` - List live sessions
//! - `GET /api/sessions/{id}/changes` - A session's change log
//! - `DELETE /api/sessions/{id}` - Forget a session

mod chat;
mod fs;
mod routes;
mod sessions;
pub mod types;

pub use chat::SESSION_HEADER;
pub use routes::{router, serve, AppState};
pub use types::*;

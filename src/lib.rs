//! # IDE Agent
//!
//! Backend for an AI coding assistant that edits a sandboxed workspace.
//!
//! The model never writes files. It proposes a structured patch, which is
//! validated as a whole and then applied with rollback on the first failure.
//!
//! ## Turn Flow
//!
//! ```text
//!  chat request ──► Orchestrator ──► (plan model) ──► edit model
//!                        │                                │
//!                        │                 PatchProposal (JSON)
//!                        ▼                                │
//!                  NDJSON events ◄── PatchApplier ◄── PatchValidator
//!                                         │
//!                                    WorkspaceStore
//! ```
//!
//! ## Modules
//! - `agents`: orchestrator, planning heuristic, event stream
//! - `patch`: proposal schema, diff application, validation, rollback
//! - `session`: per-session read/modify tracking for staleness checks
//! - `workspace`: sandboxed file store
//! - `llm`: streaming chat-completions client
//! - `api`: HTTP surface

pub mod agents;
pub mod api;
pub mod config;
pub mod llm;
pub mod patch;
pub mod session;
pub mod workspace;

pub use config::Config;

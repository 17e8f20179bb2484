//! Agent turns: turn a chat message into a validated, applied patch proposal.
//!
//! # Components
//! - **Orchestrator**: runs one turn through plan → edit → validate → apply
//! - **TaskClassifier**: decides whether a turn gets a planning pass
//! - **ModelRouter**: picks the planning or edit model
//! - **AgentEvent**: progress records streamed to the client as NDJSON

mod events;
mod orchestrator;
mod plan;
pub mod prompts;
mod router;

pub use events::{AgentEvent, ChannelSink, EventSink, RecordingSink};
pub use orchestrator::{AgentPhase, Orchestrator};
pub use plan::{Plan, PlanError};
pub use router::{KeywordClassifier, ModelRouter, TaskClassifier, TaskKind, DEFAULT_PLAN_KEYWORDS};

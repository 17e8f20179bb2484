//! Progress events streamed to the chat client, one JSON object per line.

use serde::Serialize;
use tokio::sync::mpsc;

use super::plan::Plan;

/// A single observable step of an agent turn.
///
/// Every turn ends with exactly one terminal event: `done`, `error`,
/// `validation_failed` or `patch_failed`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    PlanningStarted,
    PlanCreated {
        plan: Plan,
    },
    /// Raw edit-model text, for display only
    ModelOutput {
        delta: String,
    },
    ValidatingPatches {
        count: usize,
    },
    ValidationFailed {
        errors: Vec<String>,
    },
    ApplyingPatch {
        path: String,
        operation: String,
    },
    /// Some rollback steps failed; the workspace may be partially modified
    RollbackIncomplete {
        errors: Vec<String>,
    },
    PatchFailed {
        errors: Vec<String>,
    },
    Done {
        summary: String,
    },
    Error {
        message: String,
    },
}

impl AgentEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            AgentEvent::PlanningStarted => "planning_started",
            AgentEvent::PlanCreated { .. } => "plan_created",
            AgentEvent::ModelOutput { .. } => "model_output",
            AgentEvent::ValidatingPatches { .. } => "validating_patches",
            AgentEvent::ValidationFailed { .. } => "validation_failed",
            AgentEvent::ApplyingPatch { .. } => "applying_patch",
            AgentEvent::RollbackIncomplete { .. } => "rollback_incomplete",
            AgentEvent::PatchFailed { .. } => "patch_failed",
            AgentEvent::Done { .. } => "done",
            AgentEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentEvent::ValidationFailed { .. }
                | AgentEvent::PatchFailed { .. }
                | AgentEvent::Done { .. }
                | AgentEvent::Error { .. }
        )
    }

    pub fn error(message: impl Into<String>) -> Self {
        AgentEvent::Error {
            message: message.into(),
        }
    }

    /// Serialize as one NDJSON record, trailing newline included.
    pub fn to_ndjson(&self) -> String {
        match serde_json::to_string(self) {
            Ok(mut line) => {
                line.push('\n');
                line
            }
            Err(e) => {
                tracing::error!(event = self.event_name(), error = %e, "Failed to encode event");
                format!(
                    "{{\"type\":\"error\",\"message\":{}}}\n",
                    serde_json::Value::String(format!("Failed to encode event: {}", e))
                )
            }
        }
    }
}

/// Receiver of agent events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: AgentEvent);
}

/// Forwards events into an unbounded channel. Events sent after the receiver
/// is gone are dropped.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<AgentEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<AgentEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: AgentEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Event receiver dropped, discarding event");
        }
    }
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: std::sync::Mutex<Vec<AgentEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AgentEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(AgentEvent::event_name).collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: AgentEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

//! Patch proposals: the structured edits an agent turn produces, plus the
//! validation and application machinery that turns them into workspace writes.
//!
//! ## Pipeline
//!
//! ```text
//! raw model text ──► PatchProposal::parse ──► PatchValidator ──► PatchApplier
//!                     (schema check)          (all-or-nothing)    (rollback on
//!                                                                  first failure)
//! ```

mod applier;
mod diff;
mod validator;

pub use applier::{ApplyReport, PatchApplier, RollbackResult};
pub use diff::apply_unified_diff;
pub use validator::{
    checksum, normalize_path, PatchValidator, PathError, ValidationIssue, ValidationResult,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Kind of file mutation.
///
/// Operations the model invents are kept as [`Operation::Other`] so the
/// validator can reject them by name instead of the parser failing outright.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operation {
    Modify,
    Create,
    Delete,
    Other(String),
}

impl Operation {
    pub fn as_str(&self) -> &str {
        match self {
            Operation::Modify => "modify",
            Operation::Create => "create",
            Operation::Delete => "delete",
            Operation::Other(name) => name,
        }
    }
}

impl From<String> for Operation {
    fn from(value: String) -> Self {
        match value.as_str() {
            "modify" => Operation::Modify,
            "create" => Operation::Create,
            "delete" => Operation::Delete,
            _ => Operation::Other(value),
        }
    }
}

impl From<Operation> for String {
    fn from(value: Operation) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single proposed file mutation.
///
/// `diff` is set for `modify`, `content` for `create`; `delete` carries neither.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub path: String,
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Change {
    pub fn modify(path: impl Into<String>, diff: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            operation: Operation::Modify,
            diff: Some(diff.into()),
            content: None,
        }
    }

    pub fn create(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            operation: Operation::Create,
            diff: None,
            content: Some(content.into()),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            operation: Operation::Delete,
            diff: None,
            content: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProposalError {
    #[error("response is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("missing 'changes' array")]
    MissingChanges,

    #[error("change #{index} is malformed: {reason}")]
    InvalidChange { index: usize, reason: String },
}

/// Ordered batch of changes produced by one agent turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchProposal {
    pub changes: Vec<Change>,
}

impl PatchProposal {
    /// Parse untrusted model output.
    ///
    /// The text must be a bare JSON object with a `changes` array; prose or
    /// markdown fences around it are a parse failure.
    pub fn parse(raw: &str) -> Result<Self, ProposalError> {
        let value: Value = serde_json::from_str(raw)?;
        let items = value
            .get("changes")
            .and_then(Value::as_array)
            .ok_or(ProposalError::MissingChanges)?;

        let changes = items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                serde_json::from_value::<Change>(item.clone()).map_err(|e| {
                    ProposalError::InvalidChange {
                        index,
                        reason: e.to_string(),
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { changes })
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Outcome of applying one change. Failures are data, never panics or `Err`s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyResult {
    pub success: bool,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApplyResult {
    pub fn ok(path: impl Into<String>) -> Self {
        Self {
            success: true,
            path: path.into(),
            error: None,
        }
    }

    pub fn failed(path: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            path: path.into(),
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_proposal() {
        let raw = r#"{"changes":[
            {"path":"a.py","operation":"create","content":"print(1)\n"},
            {"path":"b.py","operation":"modify","diff":"@@ -1 +1 @@\n-x\n+y"},
            {"path":"c.py","operation":"delete"}
        ]}"#;
        let proposal = PatchProposal::parse(raw).unwrap();
        assert_eq!(proposal.len(), 3);
        assert_eq!(proposal.changes[0], Change::create("a.py", "print(1)\n"));
        assert_eq!(proposal.changes[1].operation, Operation::Modify);
        assert_eq!(proposal.changes[2], Change::delete("c.py"));
    }

    #[test]
    fn unknown_operations_survive_parsing() {
        let raw = r#"{"changes":[{"path":"a.py","operation":"rename"}]}"#;
        let proposal = PatchProposal::parse(raw).unwrap();
        assert_eq!(
            proposal.changes[0].operation,
            Operation::Other("rename".to_string())
        );
    }

    #[test]
    fn fenced_output_is_rejected() {
        let raw = "Sure! ```json {\"changes\": []}```";
        assert!(matches!(
            PatchProposal::parse(raw),
            Err(ProposalError::InvalidJson(_))
        ));
    }

    #[test]
    fn missing_changes_array_is_rejected() {
        assert!(matches!(
            PatchProposal::parse(r#"{"edits": []}"#),
            Err(ProposalError::MissingChanges)
        ));
        assert!(matches!(
            PatchProposal::parse(r#"{"changes": "a.py"}"#),
            Err(ProposalError::MissingChanges)
        ));
    }

    #[test]
    fn malformed_change_reports_index() {
        let raw = r#"{"changes":[{"path":"a.py","operation":"delete"},{"operation":"delete"}]}"#;
        match PatchProposal::parse(raw) {
            Err(ProposalError::InvalidChange { index, .. }) => assert_eq!(index, 1),
            other => panic!("unexpected parse result: {:?}", other),
        }
    }

    #[test]
    fn operation_serializes_as_plain_string() {
        let json = serde_json::to_string(&Change::delete("a.py")).unwrap();
        assert_eq!(json, r#"{"path":"a.py","operation":"delete"}"#);
    }
}

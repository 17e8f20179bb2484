//! Safety and staleness checks run before any change touches disk.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use thiserror::Error;

use super::{Change, Operation};
use crate::session::SessionTracker;
use crate::workspace::WorkspaceStore;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("Path traversal detected: {0}")]
    PathTraversal(String),

    #[error("Empty path")]
    Empty,
}

/// One reason a change was rejected. `Display` is the message shown to the user.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationIssue {
    #[error("Unsafe path: {0}")]
    UnsafePath(String),

    #[error("Cannot modify non-existent file: {0}")]
    ModifyMissingFile(String),

    #[error("Modify operation requires diff: {0}")]
    MissingDiff(String),

    #[error("File has changed since last read: {0}")]
    StaleFile(String),

    #[error("Cannot create existing file: {0}")]
    CreateExistingFile(String),

    #[error("Create operation requires content: {0}")]
    MissingContent(String),

    #[error("Cannot delete non-existent file: {0}")]
    DeleteMissingFile(String),

    #[error("Unknown operation '{operation}': {path}")]
    UnknownOperation { path: String, operation: String },

    #[error("Unexpected '{field}' field for {operation} operation: {path}")]
    UnexpectedField {
        path: String,
        field: &'static str,
        operation: Operation,
    },

    #[error("Duplicate path in proposal: {0}")]
    DuplicatePath(String),
}

/// Outcome of validating a change or a whole proposal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub errors: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Human-readable error strings, in the order they were found.
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.to_string()).collect()
    }
}

impl From<Vec<ValidationIssue>> for ValidationResult {
    fn from(errors: Vec<ValidationIssue>) -> Self {
        Self { errors }
    }
}

/// SHA-256 hex digest of `content`.
pub fn checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Resolve `raw` against `root` and return it as a `/`-separated relative path.
///
/// Works lexically so it can be applied to files that do not exist yet.
/// Absolute paths are accepted only when they land inside `root`.
pub fn normalize_path(root: &Path, raw: &str) -> Result<String, PathError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PathError::Empty);
    }
    let traversal = || PathError::PathTraversal(raw.to_string());

    let candidate = Path::new(trimmed);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };

    let resolved = lexical_normalize(&joined).ok_or_else(traversal)?;
    let rel = resolved.strip_prefix(root).map_err(|_| traversal())?;
    if rel.as_os_str().is_empty() {
        // The root itself is not a file
        return Err(traversal());
    }

    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    Ok(parts.join("/"))
}

/// Collapse `.` and `..` without touching the filesystem. `None` if `..` climbs past the top.
fn lexical_normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    return None;
                }
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    Some(out)
}

/// Validates changes for one session against the workspace.
pub struct PatchValidator {
    workspace: Arc<WorkspaceStore>,
    sessions: SessionTracker,
    session_id: String,
}

impl PatchValidator {
    pub fn new(
        workspace: Arc<WorkspaceStore>,
        sessions: SessionTracker,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            workspace,
            sessions,
            session_id: session_id.into(),
        }
    }

    pub fn normalize_path(&self, raw: &str) -> Result<String, PathError> {
        normalize_path(self.workspace.root(), raw)
    }

    /// Record the content the agent was shown, as the baseline for later modifies.
    pub async fn record_read(&self, path: &str, content: &str) {
        let key = self
            .normalize_path(path)
            .unwrap_or_else(|_| path.to_string());
        self.sessions
            .record_read(&self.session_id, &key, content)
            .await;
    }

    /// True unless the file still has exactly the content last recorded for it.
    ///
    /// No recorded read, a checksum mismatch, or an unreadable file all count as changed.
    pub async fn has_changed_since_read(&self, path: &str) -> bool {
        let key = match self.normalize_path(path) {
            Ok(key) => key,
            Err(_) => return true,
        };
        let Some(state) = self.sessions.file_state(&self.session_id, &key).await else {
            return true;
        };
        match self.workspace.read(&key).await {
            Ok(current) => checksum(&current) != state.checksum,
            Err(_) => true,
        }
    }

    pub async fn validate_change(&self, change: &Change) -> ValidationResult {
        let unsafe_path =
            || ValidationResult::from(vec![ValidationIssue::UnsafePath(change.path.clone())]);
        let path = match self.normalize_path(&change.path) {
            Ok(path) => path,
            Err(_) => return unsafe_path(),
        };
        if !self.workspace.is_contained(&path).await {
            return unsafe_path();
        }

        let mut errors = Vec::new();
        let unexpected = |field: &'static str| ValidationIssue::UnexpectedField {
            path: change.path.clone(),
            field,
            operation: change.operation.clone(),
        };

        match &change.operation {
            Operation::Modify => {
                let exists = self.workspace.is_file(&path).await;
                if !exists {
                    errors.push(ValidationIssue::ModifyMissingFile(change.path.clone()));
                }
                if change.diff.is_none() {
                    errors.push(ValidationIssue::MissingDiff(change.path.clone()));
                }
                if change.content.is_some() {
                    errors.push(unexpected("content"));
                }
                if exists && self.has_changed_since_read(&path).await {
                    errors.push(ValidationIssue::StaleFile(change.path.clone()));
                }
            }
            Operation::Create => {
                if self.workspace.exists(&path).await {
                    errors.push(ValidationIssue::CreateExistingFile(change.path.clone()));
                }
                if change.content.is_none() {
                    errors.push(ValidationIssue::MissingContent(change.path.clone()));
                }
                if change.diff.is_some() {
                    errors.push(unexpected("diff"));
                }
            }
            Operation::Delete => {
                if !self.workspace.is_file(&path).await {
                    errors.push(ValidationIssue::DeleteMissingFile(change.path.clone()));
                }
                if change.diff.is_some() {
                    errors.push(unexpected("diff"));
                }
                if change.content.is_some() {
                    errors.push(unexpected("content"));
                }
            }
            Operation::Other(name) => {
                errors.push(ValidationIssue::UnknownOperation {
                    path: change.path.clone(),
                    operation: name.clone(),
                });
            }
        }

        errors.into()
    }

    /// Validate every change and concatenate the errors.
    ///
    /// The proposal is valid only if every change is; callers apply nothing otherwise.
    pub async fn validate_proposal(&self, changes: &[Change]) -> ValidationResult {
        let mut errors = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for change in changes {
            if let Ok(path) = self.normalize_path(&change.path) {
                if !seen.insert(path) {
                    errors.push(ValidationIssue::DuplicatePath(change.path.clone()));
                    continue;
                }
            }
            errors.extend(self.validate_change(change).await.errors);
        }

        errors.into()
    }
}

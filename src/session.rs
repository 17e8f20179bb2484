//! Per-conversation file bookkeeping.
//!
//! A session remembers which files the agent has seen (with a content
//! checksum, the baseline for staleness checks), which paths it changed, and
//! an ordered change log. Sessions are created lazily on first reference and
//! reaped by a periodic sweep.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::patch::{checksum, Operation};

/// Last-known state of a file the agent has read.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileState {
    pub path: String,
    /// SHA-256 of the content the agent saw
    pub checksum: String,
    pub last_read: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChangeLogEntry {
    pub timestamp: DateTime<Utc>,
    pub path: String,
    pub operation: Operation,
    /// Checksum of the content after the change (of the empty string for deletes)
    pub checksum: String,
}

/// Aggregate state for one conversation.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub files_read: HashMap<String, FileState>,
    pub files_modified: HashSet<String>,
    pub change_log: Vec<ChangeLogEntry>,
    pub started_at: DateTime<Utc>,
    /// Last read, modify or lookup through the tracker
    pub last_activity: DateTime<Utc>,
}

impl SessionState {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            files_read: HashMap::new(),
            files_modified: HashSet::new(),
            change_log: Vec::new(),
            started_at: now,
            last_activity: now,
        }
    }
}

/// Shared handle over all live sessions.
///
/// Cloning is cheap; clones observe the same sessions. State is only mutated
/// through the methods below.
#[derive(Debug, Clone, Default)]
pub struct SessionTracker {
    sessions: Arc<RwLock<HashMap<String, SessionState>>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the session, creating it if this is the first reference.
    pub async fn get_or_create_session(&self, session_id: &str) -> SessionState {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(SessionState::new);
        session.last_activity = Utc::now();
        session.clone()
    }

    /// Record that the agent has seen `content` for `path`.
    pub async fn record_read(&self, session_id: &str, path: &str, content: &str) {
        let state = FileState {
            path: path.to_string(),
            checksum: checksum(content),
            last_read: Utc::now(),
        };
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(SessionState::new);
        session.last_activity = state.last_read;
        session.files_read.insert(path.to_string(), state);
    }

    /// Mark `path` modified and append a change log entry.
    pub async fn record_modify(
        &self,
        session_id: &str,
        path: &str,
        new_content: &str,
        operation: Operation,
    ) {
        let entry = ChangeLogEntry {
            timestamp: Utc::now(),
            path: path.to_string(),
            operation,
            checksum: checksum(new_content),
        };
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(SessionState::new);
        session.last_activity = entry.timestamp;
        session.files_modified.insert(path.to_string());
        session.change_log.push(entry);
    }

    pub async fn file_state(&self, session_id: &str, path: &str) -> Option<FileState> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .and_then(|s| s.files_read.get(path).cloned())
    }

    pub async fn was_modified(&self, session_id: &str, path: &str) -> bool {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .map(|s| s.files_modified.contains(path))
            .unwrap_or(false)
    }

    /// Copy of the session's change log, oldest first. Empty for unknown sessions.
    pub async fn change_log(&self, session_id: &str) -> Vec<ChangeLogEntry> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .map(|s| s.change_log.clone())
            .unwrap_or_default()
    }

    /// Drop a session. Returns whether it existed.
    pub async fn clear_session(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    pub async fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Remove sessions older than `max_age`. Returns how many were removed.
    ///
    /// Age counts from the later of `started_at` and `last_activity`, so a
    /// conversation still in use keeps its read baselines.
    pub async fn cleanup_old_sessions(&self, max_age: Duration) -> usize {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(max_age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.cleanup_sessions_idle_since(cutoff).await
    }

    pub async fn cleanup_sessions_idle_since(&self, cutoff: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.started_at.max(s.last_activity) >= cutoff);
        before - sessions.len()
    }

    /// Spawn the periodic sweep that bounds session memory.
    pub fn spawn_cleanup_task(&self, every: Duration, max_age: Duration) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick fires immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = tracker.cleanup_old_sessions(max_age).await;
                if removed > 0 {
                    tracing::info!(removed, "Reaped expired agent sessions");
                }
            }
        })
    }
}

//! Applies validated changes with enough backup state to undo them.

use std::sync::Arc;

use serde::Serialize;

use super::{apply_unified_diff, ApplyResult, Change, Operation};
use crate::workspace::{WorkspaceError, WorkspaceStore};

/// Pre-change state of one applied change. `previous == None` means the file did not exist.
#[derive(Debug, Clone)]
struct Backup {
    path: String,
    previous: Option<String>,
}

/// Outcome of undoing one applied change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackResult {
    pub path: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What happened to a batch: per-change results in order, plus the rollback
/// steps if a change failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub results: Vec<ApplyResult>,
    pub rollback: Vec<RollbackResult>,
}

impl ApplyReport {
    /// True when every change was attempted and all succeeded.
    pub fn succeeded(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ApplyResult> {
        self.results.iter().filter(|r| !r.success)
    }

    pub fn rollback_failures(&self) -> impl Iterator<Item = &RollbackResult> {
        self.rollback.iter().filter(|r| !r.success)
    }
}

/// Executes changes against the workspace, keeping backups until
/// [`PatchApplier::clear_backups`] commits or [`PatchApplier::rollback`] undoes them.
pub struct PatchApplier {
    workspace: Arc<WorkspaceStore>,
    history: Vec<Backup>,
}

impl PatchApplier {
    pub fn new(workspace: Arc<WorkspaceStore>) -> Self {
        Self {
            workspace,
            history: Vec::new(),
        }
    }

    pub fn apply_unified_diff(&self, original: &str, diff: &str) -> String {
        apply_unified_diff(original, diff)
    }

    /// Number of applied changes that can still be rolled back.
    pub fn pending_backups(&self) -> usize {
        self.history.len()
    }

    /// Apply one change. I/O failures come back as `success: false`.
    pub async fn apply_change(&mut self, change: &Change) -> ApplyResult {
        match self.try_apply(change).await {
            Ok(()) => {
                tracing::debug!(path = %change.path, operation = %change.operation, "Applied change");
                ApplyResult::ok(&change.path)
            }
            Err(error) => ApplyResult::failed(&change.path, error),
        }
    }

    async fn try_apply(&mut self, change: &Change) -> Result<(), String> {
        let path = change.path.as_str();
        match &change.operation {
            Operation::Modify => {
                let diff = change
                    .diff
                    .as_deref()
                    .ok_or_else(|| "Diff required for modify operation".to_string())?;
                let original = self.workspace.read(path).await.map_err(|e| e.to_string())?;
                let modified = apply_unified_diff(&original, diff);
                self.history.push(Backup {
                    path: path.to_string(),
                    previous: Some(original),
                });
                self.workspace
                    .write(path, &modified)
                    .await
                    .map_err(|e| e.to_string())
            }
            Operation::Create => {
                let content = change
                    .content
                    .as_deref()
                    .ok_or_else(|| "Content required for create operation".to_string())?;
                // Rolling back a create deletes the file, so never create over an existing one
                if self.workspace.exists(path).await {
                    return Err(format!("File already exists: {}", path));
                }
                self.workspace
                    .write(path, content)
                    .await
                    .map_err(|e| e.to_string())?;
                self.history.push(Backup {
                    path: path.to_string(),
                    previous: None,
                });
                Ok(())
            }
            Operation::Delete => {
                let original = self.workspace.read(path).await.map_err(|e| e.to_string())?;
                self.history.push(Backup {
                    path: path.to_string(),
                    previous: Some(original),
                });
                self.workspace.remove(path).await.map_err(|e| e.to_string())
            }
            Operation::Other(name) => Err(format!("Unknown operation: {}", name)),
        }
    }

    /// Apply changes strictly in order, rolling back this batch on the first failure.
    pub async fn apply_changes(&mut self, changes: &[Change]) -> ApplyReport {
        self.apply_changes_with(changes, |_| {}).await
    }

    /// Like [`PatchApplier::apply_changes`], calling `before_each` right before each attempt.
    ///
    /// Changes after the failing one are never attempted or announced.
    pub async fn apply_changes_with<F>(&mut self, changes: &[Change], mut before_each: F) -> ApplyReport
    where
        F: FnMut(&Change),
    {
        let mark = self.history.len();
        let mut results = Vec::with_capacity(changes.len());

        for change in changes {
            before_each(change);
            let result = self.apply_change(change).await;
            let failed = !result.success;
            results.push(result);

            if failed {
                tracing::warn!(
                    path = %change.path,
                    operation = %change.operation,
                    applied = results.len() - 1,
                    "Change failed, rolling back batch"
                );
                let rollback = self.rollback_to(mark).await;
                return ApplyReport { results, rollback };
            }
        }

        ApplyReport {
            results,
            rollback: Vec::new(),
        }
    }

    /// Undo every change still in history, newest first.
    ///
    /// Each step is attempted even if an earlier one failed. History is empty afterwards.
    pub async fn rollback(&mut self) -> Vec<RollbackResult> {
        self.rollback_to(0).await
    }

    async fn rollback_to(&mut self, mark: usize) -> Vec<RollbackResult> {
        let mark = mark.min(self.history.len());
        let entries: Vec<Backup> = self.history.drain(mark..).rev().collect();
        if entries.is_empty() {
            return Vec::new();
        }
        tracing::info!(count = entries.len(), "Rolling back applied changes");

        let mut results = Vec::with_capacity(entries.len());
        for Backup { path, previous } in entries {
            let outcome = match &previous {
                None => match self.workspace.remove(&path).await {
                    // Already gone is what the undo wanted
                    Err(WorkspaceError::NotFound(_)) => Ok(()),
                    other => other,
                },
                Some(content) => self.workspace.write(&path, content).await,
            };

            match outcome {
                Ok(()) => results.push(RollbackResult {
                    path,
                    success: true,
                    error: None,
                }),
                Err(e) => {
                    tracing::error!(path = %path, error = %e, "Failed to roll back change");
                    results.push(RollbackResult {
                        path,
                        success: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        results
    }

    /// Commit: forget backups without undoing anything.
    pub fn clear_backups(&mut self) {
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> (tempfile::TempDir, Arc<WorkspaceStore>, PatchApplier) {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(WorkspaceStore::open(temp.path()).await.expect("store"));
        let applier = PatchApplier::new(Arc::clone(&store));
        (temp, store, applier)
    }

    #[tokio::test]
    async fn modify_applies_diff() {
        let (_temp, store, mut applier) = setup().await;
        store.write("a.py", "x=1\ny=2\n").await.unwrap();

        let result = applier
            .apply_change(&Change::modify("a.py", "@@ -1,2 +1,2 @@\n-x=1\n+x=5\n y=2\n"))
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(store.read("a.py").await.unwrap(), "x=5\ny=2\n");
        assert_eq!(applier.pending_backups(), 1);
    }

    #[tokio::test]
    async fn failures_are_returned_not_raised() {
        let (_temp, _store, mut applier) = setup().await;
        let result = applier.apply_change(&Change::delete("nope.py")).await;
        assert!(!result.success);
        assert_eq!(result.path, "nope.py");
        assert!(result.error.unwrap().contains("nope.py"));
        assert_eq!(applier.pending_backups(), 0);
    }

    #[tokio::test]
    async fn create_refuses_to_overwrite() {
        let (_temp, store, mut applier) = setup().await;
        store.write("a.py", "keep").await.unwrap();
        let result = applier.apply_change(&Change::create("a.py", "new")).await;
        assert!(!result.success);
        assert_eq!(store.read("a.py").await.unwrap(), "keep");
    }

    #[tokio::test]
    async fn create_then_delete_leaves_no_file() {
        let (_temp, store, mut applier) = setup().await;
        let report = applier
            .apply_changes(&[Change::create("t.py", "C"), Change::delete("t.py")])
            .await;
        assert!(report.succeeded());
        assert!(!store.exists("t.py").await);
    }

    #[tokio::test]
    async fn rolling_back_a_create_removes_the_file() {
        let (_temp, store, mut applier) = setup().await;
        assert!(applier.apply_change(&Change::create("pkg/t.py", "C")).await.success);
        assert!(store.is_file("pkg/t.py").await);

        let rollback = applier.rollback().await;
        assert_eq!(rollback.len(), 1);
        assert!(rollback[0].success);
        assert!(!store.exists("pkg/t.py").await);
        assert_eq!(applier.pending_backups(), 0);
    }

    #[tokio::test]
    async fn first_failure_rolls_back_whole_batch() {
        let (_temp, store, mut applier) = setup().await;
        store.write("a.py", "a=1\n").await.unwrap();
        store.write("c.py", "c=1\n").await.unwrap();

        let changes = vec![
            Change::modify("a.py", "@@ -1 +1 @@\n-a=1\n+a=2\n"),
            Change::create("b.py", "b=1\n"),
            Change::delete("c.py"),
            // Vanished between validation and apply
            Change::modify("gone.py", "@@ -1 +1 @@\n-x\n+y\n"),
            Change::create("later.py", "never\n"),
        ];

        let mut announced = Vec::new();
        let report = applier
            .apply_changes_with(&changes, |c| announced.push(c.path.clone()))
            .await;

        assert!(!report.succeeded());
        assert_eq!(report.results.len(), 4);
        assert!(report.results[..3].iter().all(|r| r.success));
        assert!(!report.results[3].success);
        assert_eq!(announced, vec!["a.py", "b.py", "c.py", "gone.py"]);

        assert_eq!(report.rollback.len(), 3);
        assert_eq!(report.rollback_failures().count(), 0);
        assert_eq!(
            report.rollback.iter().map(|r| r.path.as_str()).collect::<Vec<_>>(),
            vec!["c.py", "b.py", "a.py"]
        );

        assert_eq!(store.read("a.py").await.unwrap(), "a=1\n");
        assert!(!store.exists("b.py").await);
        assert_eq!(store.read("c.py").await.unwrap(), "c=1\n");
        assert!(!store.exists("later.py").await);
        assert_eq!(applier.pending_backups(), 0);
    }

    #[tokio::test]
    async fn batch_rollback_leaves_earlier_committed_batches_alone() {
        let (_temp, store, mut applier) = setup().await;
        let first = applier.apply_changes(&[Change::create("one.py", "1")]).await;
        assert!(first.succeeded());

        let second = applier
            .apply_changes(&[Change::create("two.py", "2"), Change::delete("missing.py")])
            .await;
        assert!(!second.succeeded());
        assert!(store.is_file("one.py").await);
        assert!(!store.exists("two.py").await);
        assert_eq!(applier.pending_backups(), 1);
    }

    #[tokio::test]
    async fn rollback_continues_past_failed_steps() {
        let (_temp, store, mut applier) = setup().await;
        store.write("sub/a.txt", "original").await.unwrap();

        assert!(applier.apply_change(&Change::modify("sub/a.txt", "@@\n-original\n+changed")).await.success);
        assert!(applier.apply_change(&Change::create("z.py", "z")).await.success);

        // Replace the directory with a file so restoring sub/a.txt cannot succeed
        std::fs::remove_dir_all(store.root().join("sub")).unwrap();
        std::fs::write(store.root().join("sub"), "blocker").unwrap();

        let rollback = applier.rollback().await;
        assert_eq!(rollback.len(), 2);
        assert_eq!(rollback[0].path, "z.py");
        assert!(rollback[0].success);
        assert_eq!(rollback[1].path, "sub/a.txt");
        assert!(!rollback[1].success);
        assert!(rollback[1].error.is_some());
        assert!(!store.exists("z.py").await);
        assert_eq!(applier.pending_backups(), 0);
    }

    #[tokio::test]
    async fn clear_backups_commits() {
        let (_temp, store, mut applier) = setup().await;
        assert!(applier.apply_change(&Change::create("keep.py", "k")).await.success);
        applier.clear_backups();
        assert!(applier.rollback().await.is_empty());
        assert!(store.is_file("keep.py").await);
    }
}

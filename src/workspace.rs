//! Workspace store: the sandboxed directory tree the agent reads and edits.
//!
//! All paths handed to the store are workspace-relative. Security policy
//! (traversal detection, staleness) lives in [`crate::patch::PatchValidator`];
//! the store only refuses paths that are absolute, contain `..` or lead
//! through a symlink out of the root, so that a caller skipping validation
//! still cannot write outside it.

use std::io;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use walkdir::WalkDir;

/// Suffix for in-flight atomic writes; such files are hidden from listings.
const TMP_SUFFIX: &str = ".ide-agent-tmp";

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Path is outside the workspace: {0}")]
    OutsideRoot(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl WorkspaceError {
    fn from_io(path: &str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            WorkspaceError::NotFound(path.to_string())
        } else {
            WorkspaceError::Io {
                path: path.to_string(),
                source,
            }
        }
    }
}

/// A text file in the workspace, as exchanged with the chat client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkspaceFile {
    pub name: String,
    pub content: String,
}

/// Directory-rooted file store.
#[derive(Debug, Clone)]
pub struct WorkspaceStore {
    root: PathBuf,
}

impl WorkspaceStore {
    /// Open (and create if needed) a workspace rooted at `root`.
    ///
    /// The root is canonicalized so containment checks compare like with like.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, WorkspaceError> {
        let root = root.as_ref();
        let display = root.display().to_string();
        fs::create_dir_all(root)
            .await
            .map_err(|e| WorkspaceError::from_io(&display, e))?;
        let root = fs::canonicalize(root)
            .await
            .map_err(|e| WorkspaceError::from_io(&display, e))?;
        Ok(Self { root })
    }

    /// Canonical workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join a relative path onto the root, refusing anything that could leave it.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, WorkspaceError> {
        let rel = Path::new(path);
        let escapes = rel.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes || path.trim().is_empty() {
            return Err(WorkspaceError::OutsideRoot(path.to_string()));
        }
        Ok(self.root.join(rel))
    }

    pub async fn read(&self, path: &str) -> Result<String, WorkspaceError> {
        let full = self.resolve(path)?;
        fs::read_to_string(&full)
            .await
            .map_err(|e| WorkspaceError::from_io(path, e))
    }

    /// Write `content` to `path`, creating parent directories.
    ///
    /// The content lands in a sibling temp file first and is renamed over the
    /// target, so readers never observe a half-written file. An existing
    /// file keeps its permissions, and a symlinked file is written through to
    /// its target.
    pub async fn write(&self, path: &str, content: &str) -> Result<(), WorkspaceError> {
        let mut full = self.resolve(path)?;
        if !self.is_contained(path).await {
            return Err(WorkspaceError::OutsideRoot(path.to_string()));
        }
        if matches!(fs::symlink_metadata(&full).await, Ok(m) if m.file_type().is_symlink()) {
            full = fs::canonicalize(&full)
                .await
                .map_err(|e| WorkspaceError::from_io(path, e))?;
        }
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| WorkspaceError::from_io(path, e))?;
        }

        let permissions = match fs::metadata(&full).await {
            Ok(meta) if meta.is_file() => Some(meta.permissions()),
            _ => None,
        };

        let tmp = temp_sibling(&full);
        if let Err(e) = fs::write(&tmp, content).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(WorkspaceError::from_io(path, e));
        }
        if let Some(permissions) = permissions {
            if let Err(e) = fs::set_permissions(&tmp, permissions).await {
                let _ = fs::remove_file(&tmp).await;
                return Err(WorkspaceError::from_io(path, e));
            }
        }
        if let Err(e) = fs::rename(&tmp, &full).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(WorkspaceError::from_io(path, e));
        }
        Ok(())
    }

    /// Whether `path` stays under the root once symlinks are followed.
    ///
    /// Checks the deepest existing ancestor, so it works for files that do
    /// not exist yet. A dangling symlink counts as escaping.
    pub async fn is_contained(&self, path: &str) -> bool {
        let Ok(mut candidate) = self.resolve(path) else {
            return false;
        };
        loop {
            if fs::symlink_metadata(&candidate).await.is_ok() {
                return match fs::canonicalize(&candidate).await {
                    Ok(real) => real.starts_with(&self.root),
                    Err(_) => false,
                };
            }
            if !candidate.pop() || !candidate.starts_with(&self.root) {
                return false;
            }
        }
    }

    pub async fn remove(&self, path: &str) -> Result<(), WorkspaceError> {
        let full = self.resolve(path)?;
        fs::remove_file(&full)
            .await
            .map_err(|e| WorkspaceError::from_io(path, e))
    }

    /// Whether a regular file exists at `path`.
    pub async fn is_file(&self, path: &str) -> bool {
        match self.resolve(path) {
            Ok(full) => matches!(fs::metadata(&full).await, Ok(m) if m.is_file()),
            Err(_) => false,
        }
    }

    /// Whether anything (file or directory) exists at `path`.
    pub async fn exists(&self, path: &str) -> bool {
        match self.resolve(path) {
            Ok(full) => fs::symlink_metadata(&full).await.is_ok(),
            Err(_) => false,
        }
    }

    /// Recursively list every file, as `/`-separated relative paths in sorted order.
    pub fn list(&self) -> Vec<String> {
        WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| !e.file_name().to_string_lossy().ends_with(TMP_SUFFIX))
            .filter_map(|e| {
                let rel = e.path().strip_prefix(&self.root).ok()?;
                let parts: Vec<String> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().to_string())
                    .collect();
                Some(parts.join("/"))
            })
            .collect()
    }

    /// Read every text file in listing order.
    ///
    /// With `max_bytes`, stops before the running total would exceed the cap.
    /// Files that are not valid UTF-8 are skipped.
    pub async fn read_all(&self, max_bytes: Option<usize>) -> Result<Vec<WorkspaceFile>, WorkspaceError> {
        let mut files = Vec::new();
        let mut total = 0usize;

        for name in self.list() {
            let content = match self.read(&name).await {
                Ok(content) => content,
                Err(WorkspaceError::Io { source, .. })
                    if source.kind() == io::ErrorKind::InvalidData =>
                {
                    tracing::debug!(path = %name, "Skipping non-UTF-8 file");
                    continue;
                }
                // Removed between listing and reading
                Err(WorkspaceError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };

            if let Some(limit) = max_bytes {
                if total + content.len() > limit {
                    tracing::debug!(path = %name, total, limit, "Workspace context cap reached");
                    break;
                }
            }
            total += content.len();
            files.push(WorkspaceFile { name, content });
        }

        Ok(files)
    }
}

fn temp_sibling(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let nonce = &uuid::Uuid::new_v4().simple().to_string()[..8];
    target.with_file_name(format!(".{}.{}{}", name, nonce, TMP_SUFFIX))
}

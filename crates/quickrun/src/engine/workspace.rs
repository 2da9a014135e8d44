//! Temporary workspace lifecycle
//!
//! Every compilation gets its own uniquely named directory. Directories are
//! tracked in a registry so that anything left behind (kept for debugging, or
//! whose removal failed) can still be swept when the compiler closes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Prefix of every workspace directory name
pub const WORKSPACE_PREFIX: &str = "quickrun-";

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("failed to create workspace at {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Arena of live workspace directories keyed by a monotonically increasing handle
#[derive(Debug, Default)]
pub struct WorkspaceRegistry {
    entries: Mutex<HashMap<u64, PathBuf>>,
    next_id: AtomicU64,
}

impl WorkspaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and track a fresh directory under `root`
    ///
    /// With `keep` set the directory survives the returned guard and is only
    /// removed by [`cleanup_all`](Self::cleanup_all).
    #[instrument(skip(self))]
    pub async fn create(
        self: &Arc<Self>,
        root: &Path,
        keep: bool,
    ) -> Result<Workspace, WorkspaceError> {
        let path = root.join(format!("{WORKSPACE_PREFIX}{}", Uuid::new_v4().simple()));

        tokio::fs::create_dir_all(root)
            .await
            .map_err(|source| WorkspaceError::Create {
                path: root.to_path_buf(),
                source,
            })?;
        tokio::fs::create_dir(&path)
            .await
            .map_err(|source| WorkspaceError::Create {
                path: path.clone(),
                source,
            })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().insert(id, path.clone());
        debug!(id, ?path, "created workspace");

        Ok(Workspace {
            id,
            path,
            keep,
            released: false,
            registry: Arc::clone(self),
        })
    }

    /// Number of tracked directories
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Paths of all tracked directories
    pub fn paths(&self) -> Vec<PathBuf> {
        self.entries.lock().values().cloned().collect()
    }

    /// Remove every tracked directory, returning how many were removed
    ///
    /// Directories whose removal fails stay tracked.
    #[instrument(skip(self))]
    pub fn cleanup_all(&self) -> usize {
        let tracked: Vec<(u64, PathBuf)> = self
            .entries
            .lock()
            .iter()
            .map(|(id, path)| (*id, path.clone()))
            .collect();

        let mut removed = 0;
        for (id, path) in tracked {
            if remove_dir(&path) {
                self.release(id);
                removed += 1;
            }
        }
        debug!(removed, remaining = self.len(), "workspace cleanup finished");
        removed
    }

    fn release(&self, id: u64) {
        self.entries.lock().remove(&id);
    }
}

/// A tracked workspace directory
///
/// Dropping the guard removes the directory and stops tracking it, unless the
/// workspace was created with `keep`. Removal on drop blocks the dropping
/// thread; async callers should finish with [`remove`](Self::remove).
#[derive(Debug)]
pub struct Workspace {
    id: u64,
    path: PathBuf,
    keep: bool,
    /// Set once [`remove`](Self::remove) has dealt with the directory
    released: bool,
    registry: Arc<WorkspaceRegistry>,
}

impl Workspace {
    /// Registry handle
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Host path of a file inside the workspace
    ///
    /// Rejects absolute paths and parent-directory components.
    pub fn file_path(&self, name: &str) -> Result<PathBuf, WorkspaceError> {
        if name.is_empty() || name.contains("..") || name.starts_with('/') {
            return Err(WorkspaceError::InvalidPath(format!(
                "path traversal not allowed: {name}"
            )));
        }
        Ok(self.path.join(name))
    }

    /// Remove the directory on the blocking pool and stop tracking it
    ///
    /// Kept workspaces stay on disk and tracked.
    pub async fn remove(mut self) {
        if self.keep {
            return;
        }
        self.released = true;

        let path = self.path.clone();
        let removed = match tokio::task::spawn_blocking(move || remove_dir(&path)).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(id = self.id, error = %e, "workspace removal task failed");
                false
            }
        };
        if removed {
            self.registry.release(self.id);
        }
    }

    #[instrument(skip(self, content))]
    pub async fn write_file(&self, name: &str, content: &[u8]) -> Result<PathBuf, WorkspaceError> {
        let path = self.file_path(name)?;
        tokio::fs::write(&path, content).await?;
        debug!(?path, len = content.len(), "wrote file to workspace");
        Ok(path)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if self.keep {
            debug!(id = self.id, path = %self.path.display(), "keeping workspace");
            return;
        }
        if remove_dir(&self.path) {
            self.registry.release(self.id);
        }
    }
}

/// Remove `path` recursively; a directory that is already gone counts as removed
fn remove_dir(path: &Path) -> bool {
    match std::fs::remove_dir_all(path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to remove workspace");
            false
        }
    }
}

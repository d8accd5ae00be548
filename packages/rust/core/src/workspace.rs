//! Per-run staging directories.
//!
//! Every pipeline run gets its own tree under the configured root:
//!
//! ```text
//! <root>/ws-<uuid>/
//!   sources/        raw document, copied backend script
//!   index/          backend output (ingest) or extracted archive (query)
//!   index.tar.gz    packed index
//! ```
//!
//! A [`Workspace`] removes its tree when dropped unless the manager runs in
//! retain (debug) mode, so every exit path of a pipeline cleans up.

use std::path::{Path, PathBuf};

use contextqa_shared::{ContextQaError, Result, WorkspaceConfig};
use tracing::{debug, warn};
use uuid::Uuid;

/// Input staging subdirectory.
pub const SOURCES_DIR: &str = "sources";

/// Backend output / extracted index directory.
pub const INDEX_DIR: &str = "index";

/// Packed index file name.
pub const ARCHIVE_NAME: &str = "index.tar.gz";

/// Allocates workspaces under a configured root.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    config: WorkspaceConfig,
}

impl WorkspaceManager {
    pub fn new(config: WorkspaceConfig) -> Self {
        Self { config }
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn retains(&self) -> bool {
        self.config.retain
    }

    /// Create a fresh, uniquely named workspace with its staging subdirectory.
    pub fn create(&self) -> Result<Workspace> {
        let path = self
            .config
            .root
            .join(format!("ws-{}", Uuid::new_v4().simple()));

        std::fs::create_dir_all(path.join(SOURCES_DIR)).map_err(|e| {
            ContextQaError::workspace(format!("failed to create workspace: {e}"))
        })?;

        debug!(?path, "workspace created");
        Ok(Workspace {
            path,
            retain: self.config.retain,
            destroyed: false,
        })
    }
}

/// A staging directory owned by exactly one pipeline run.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    retain: bool,
    destroyed: bool,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sources_dir(&self) -> PathBuf {
        self.path.join(SOURCES_DIR)
    }

    pub fn index_dir(&self) -> PathBuf {
        self.path.join(INDEX_DIR)
    }

    pub fn archive_path(&self) -> PathBuf {
        self.path.join(ARCHIVE_NAME)
    }

    /// Remove the tree now and report failures. No-op in retain mode.
    pub fn destroy(mut self) -> Result<()> {
        self.destroyed = true;
        if self.retain {
            debug!(path = ?self.path, "retaining workspace");
            return Ok(());
        }
        remove_tree(&self.path)
            .map_err(|e| ContextQaError::workspace(format!("failed to remove workspace: {e}")))
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.destroyed || self.retain {
            return;
        }
        if let Err(e) = remove_tree(&self.path) {
            warn!(path = ?self.path, error = %e, "failed to remove workspace");
        }
    }
}

fn remove_tree(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => {
            debug!(?path, "workspace removed");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(root: &Path, retain: bool) -> WorkspaceManager {
        WorkspaceManager::new(WorkspaceConfig {
            root: root.to_path_buf(),
            retain,
        })
    }

    #[test]
    fn create_builds_staging_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = manager(tmp.path(), false).create().unwrap();
        assert!(ws.sources_dir().is_dir());
        assert!(ws.path().starts_with(tmp.path()));
        assert!(!ws.index_dir().exists());
    }

    #[test]
    fn names_do_not_collide() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path(), false);
        let a = mgr.create().unwrap();
        let b = mgr.create().unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn drop_removes_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = manager(tmp.path(), false).create().unwrap();
        let path = ws.path().to_path_buf();
        std::fs::write(ws.sources_dir().join("doc.txt"), "x").unwrap();
        drop(ws);
        assert!(!path.exists());
    }

    #[test]
    fn destroy_removes_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = manager(tmp.path(), false).create().unwrap();
        let path = ws.path().to_path_buf();
        ws.destroy().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn retain_mode_keeps_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path(), true);
        let first = mgr.create().unwrap();
        let first_path = first.path().to_path_buf();
        first.destroy().unwrap();
        let second = mgr.create().unwrap();
        let second_path = second.path().to_path_buf();
        drop(second);
        assert!(first_path.is_dir());
        assert!(second_path.is_dir());
    }

    #[test]
    fn unwritable_root_is_workspace_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, "not a dir").unwrap();

        let err = manager(&blocker, false).create().unwrap_err();
        assert_eq!(err.reason_code(), "workspace_error");
    }
}

// src/engine/workspace.rs

//! Private per-run workspaces.
//!
//! Every run gets a fresh `cell-XXXXXX` directory under the workspace root.
//! Directories are never reused. They are also not removed when the run ends,
//! because callers fetch artifacts (images, JSON) lazily afterwards. Cleanup is
//! explicit: `Workspace::dispose` for one run, `prune_workspaces` for age-based
//! eviction.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::CellError;
use crate::language::Language;
use crate::shim::HarnessPaths;

const WORKSPACE_PREFIX: &str = "cell-";

/// Default root for run workspaces: `<tmp>/flowboard`.
pub fn default_root() -> PathBuf {
    std::env::temp_dir().join("flowboard")
}

#[derive(Debug, Clone)]
pub struct Workspace {
    dir: PathBuf,
    paths: HarnessPaths,
}

impl Workspace {
    /// Create a new, uniquely named workspace under `root`.
    pub fn create(root: &Path) -> Result<Self, CellError> {
        std::fs::create_dir_all(root).map_err(|source| CellError::Workspace {
            path: root.to_path_buf(),
            source,
        })?;

        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(root)
            .map_err(|source| CellError::Workspace {
                path: root.to_path_buf(),
                source,
            })?
            .keep();

        Ok(Self {
            paths: HarnessPaths::in_dir(&dir),
            dir,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn paths(&self) -> &HarnessPaths {
        &self.paths
    }

    pub fn script_path(&self, language: Language) -> PathBuf {
        self.dir.join(language.script_name())
    }

    /// Remove the workspace and every artifact in it.
    pub fn dispose(self) -> io::Result<()> {
        std::fs::remove_dir_all(&self.dir)
    }
}

/// Delete workspaces under `root` whose last modification is older than `max_age`.
///
/// Only `cell-*` directories are touched. Returns how many were removed.
/// A missing root is not an error.
pub fn prune_workspaces(root: &Path, max_age: Duration) -> io::Result<usize> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let now = SystemTime::now();
    let mut removed = 0;

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(WORKSPACE_PREFIX) {
            continue;
        }

        let meta = entry.metadata()?;
        if !meta.is_dir() {
            continue;
        }

        let age = meta
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .unwrap_or_default();

        if age >= max_age {
            match std::fs::remove_dir_all(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "failed to prune workspace")
                }
            }
        }
    }

    Ok(removed)
}

// src/engine/registry.rs

//! Bookkeeping of in-flight runs.
//!
//! Entries are keyed by run id, not node id, so a node can be re-run while a
//! previous run is still going. Each entry carries a cancellation token that
//! the executor races against the child process; cancelling a node therefore
//! kills its subprocesses rather than just forgetting about them.

use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;

use crate::execution_id::RunId;

/// Snapshot of one in-flight run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunHandle {
    pub run_id: RunId,
    pub node_id: String,
    pub workspace_dir: PathBuf,
    pub started_at: SystemTime,
}

#[derive(Debug)]
struct Entry {
    handle: RunHandle,
    cancel: CancellationToken,
}

#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    inner: Arc<Mutex<HashMap<RunId, Entry>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RunId, Entry>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a run. The entry is removed when the returned guard drops.
    pub fn begin(&self, run_id: RunId, node_id: &str, workspace_dir: &Path) -> RunGuard {
        let cancel = CancellationToken::new();
        let handle = RunHandle {
            run_id: run_id.clone(),
            node_id: node_id.to_string(),
            workspace_dir: workspace_dir.to_path_buf(),
            started_at: SystemTime::now(),
        };

        self.lock().insert(
            run_id.clone(),
            Entry {
                handle,
                cancel: cancel.clone(),
            },
        );

        RunGuard {
            registry: self.clone(),
            run_id,
            cancel,
        }
    }

    pub fn end(&self, run_id: &RunId) {
        self.lock().remove(run_id);
    }

    pub fn is_running(&self, node_id: &str) -> bool {
        self.lock().values().any(|e| e.handle.node_id == node_id)
    }

    /// Cancel every in-flight run of `node_id`. Returns how many were signalled.
    pub fn cancel(&self, node_id: &str) -> usize {
        let mut map = self.lock();
        let ids: Vec<RunId> = map
            .iter()
            .filter(|(_, e)| e.handle.node_id == node_id)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &ids {
            if let Some(entry) = map.remove(id) {
                entry.cancel.cancel();
            }
        }

        if !ids.is_empty() {
            tracing::info!(node_id, runs = ids.len(), "cancelled node runs");
        }
        ids.len()
    }

    pub fn cancel_run(&self, run_id: &RunId) -> bool {
        match self.lock().remove(run_id) {
            Some(entry) => {
                entry.cancel.cancel();
                tracing::info!(%run_id, "cancelled run");
                true
            }
            None => false,
        }
    }

    pub fn running(&self) -> Vec<RunHandle> {
        let mut list: Vec<RunHandle> = self.lock().values().map(|e| e.handle.clone()).collect();
        list.sort_by_key(|h| h.started_at);
        list
    }
}

/// Keeps a run registered for as long as it lives.
#[derive(Debug)]
pub struct RunGuard {
    registry: RunRegistry,
    run_id: RunId,
    cancel: CancellationToken,
}

impl RunGuard {
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry.end(&self.run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_drop_clears_entry() {
        let reg = RunRegistry::new();
        let guard = reg.begin(RunId::new(), "node-1", Path::new("/tmp/cell-a"));
        assert!(reg.is_running("node-1"));

        drop(guard);

        assert!(!reg.is_running("node-1"));
        assert!(reg.running().is_empty());
    }

    #[test]
    fn same_node_runs_are_tracked_separately() {
        let reg = RunRegistry::new();
        let first = reg.begin(RunId::new(), "node-1", Path::new("/tmp/cell-a"));
        let second = reg.begin(RunId::new(), "node-1", Path::new("/tmp/cell-b"));
        assert_eq!(reg.running().len(), 2);

        drop(first);
        assert!(reg.is_running("node-1"));

        drop(second);
        assert!(!reg.is_running("node-1"));
    }

    #[test]
    fn cancel_signals_every_run_of_node() {
        let reg = RunRegistry::new();
        let a = reg.begin(RunId::new(), "node-1", Path::new("/tmp/cell-a"));
        let b = reg.begin(RunId::new(), "node-1", Path::new("/tmp/cell-b"));
        let other = reg.begin(RunId::new(), "node-2", Path::new("/tmp/cell-c"));

        assert_eq!(reg.cancel("node-1"), 2);

        assert!(a.token().is_cancelled());
        assert!(b.token().is_cancelled());
        assert!(!other.token().is_cancelled());
        assert!(!reg.is_running("node-1"));
        assert!(reg.is_running("node-2"));
        assert_eq!(reg.cancel("node-1"), 0);
    }

    #[test]
    fn cancel_run_targets_one_run() {
        let reg = RunRegistry::new();
        let a = reg.begin(RunId::new(), "node-1", Path::new("/tmp/cell-a"));
        let b = reg.begin(RunId::new(), "node-1", Path::new("/tmp/cell-b"));

        assert!(reg.cancel_run(a.run_id()));
        assert!(!reg.cancel_run(a.run_id()));

        assert!(a.token().is_cancelled());
        assert!(!b.token().is_cancelled());
        assert!(reg.is_running("node-1"));
    }
}

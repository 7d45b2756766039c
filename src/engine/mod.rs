use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

pub mod binder;
pub mod execute;
pub mod registry;
pub mod request;
pub mod workspace;

pub use binder::{bind_inputs, collect_inputs, Link, NodeOutputs, PortDef, PortRef};
pub use execute::{Executor, ExecutorSettings, RunOutcome};
pub use registry::{RunGuard, RunHandle, RunRegistry};
pub use request::RunRequest;
pub use workspace::{prune_workspaces, Workspace};

/* ---------------- execution result ---------------- */

/// Terminal outcome of one cell run.
///
/// Wire shape:
/// - success: `{ "ok": true, "stdout", "imagePath"?, "data"?, "warning"? }`
/// - failure: `{ "ok": false, "error", "stdout"? }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "ResultWire", from = "ResultWire")]
pub enum ExecutionResult {
    Success {
        stdout: String,
        image_path: Option<PathBuf>,
        /// Parsed structured-value artifact. `None` when the cell produced no
        /// value or the artifact was not valid JSON.
        data: Option<Value>,
        /// Non-empty stderr of a run that still exited zero.
        warning: Option<String>,
    },
    Failure {
        error: String,
        stdout: Option<String>,
    },
}

impl ExecutionResult {
    pub fn failure(error: impl Into<String>, stdout: Option<String>) -> Self {
        ExecutionResult::Failure {
            error: error.into(),
            stdout,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ExecutionResult::Success { .. })
    }

    pub fn stdout(&self) -> Option<&str> {
        match self {
            ExecutionResult::Success { stdout, .. } => Some(stdout),
            ExecutionResult::Failure { stdout, .. } => stdout.as_deref(),
        }
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            ExecutionResult::Success { data, .. } => data.as_ref(),
            ExecutionResult::Failure { .. } => None,
        }
    }

    /// The captured cell value, i.e. `data.value`.
    pub fn value(&self) -> Option<&Value> {
        self.data().and_then(|d| d.get("value"))
    }

    pub fn warning(&self) -> Option<&str> {
        match self {
            ExecutionResult::Success { warning, .. } => warning.as_deref(),
            ExecutionResult::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ExecutionResult::Success { .. } => None,
            ExecutionResult::Failure { error, .. } => Some(error),
        }
    }

    pub fn image_path(&self) -> Option<&PathBuf> {
        match self {
            ExecutionResult::Success { image_path, .. } => image_path.as_ref(),
            ExecutionResult::Failure { .. } => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultWire {
    ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<ExecutionResult> for ResultWire {
    fn from(result: ExecutionResult) -> Self {
        match result {
            ExecutionResult::Success {
                stdout,
                image_path,
                data,
                warning,
            } => ResultWire {
                ok: true,
                stdout: Some(stdout),
                image_path,
                data,
                warning,
                error: None,
            },
            ExecutionResult::Failure { error, stdout } => ResultWire {
                ok: false,
                stdout,
                image_path: None,
                data: None,
                warning: None,
                error: Some(error),
            },
        }
    }
}

impl From<ResultWire> for ExecutionResult {
    fn from(wire: ResultWire) -> Self {
        if wire.ok {
            ExecutionResult::Success {
                stdout: wire.stdout.unwrap_or_default(),
                image_path: wire.image_path,
                data: wire.data,
                warning: wire.warning,
            }
        } else {
            ExecutionResult::Failure {
                error: wire.error.unwrap_or_default(),
                stdout: wire.stdout,
            }
        }
    }
}

// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

use crate::language::Language;

/// Failures inside the execution engine.
///
/// None of these cross the orchestration boundary: `Executor` turns every
/// variant into an `ExecutionResult::Failure` with a readable message.
#[derive(Error, Debug)]
pub enum CellError {
    #[error("No {language} interpreter found")]
    Discovery { language: Language },

    #[error("Failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to prepare workspace {path:?}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read cell source {path:?}: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode parameters: {0}")]
    Params(#[from] serde_json::Error),

    #[error("Failed while waiting for process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Run timed out after {ms}ms")]
    TimedOut { ms: u64 },
}

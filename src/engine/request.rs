use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

use crate::error::CellError;
use crate::language::Language;

/// One cell execution as submitted by a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub language: Language,

    #[serde(default)]
    pub code: String,

    /// Parameters object; `inputs` carries the ordered upstream values.
    #[serde(default)]
    pub params: Map<String, Value>,

    /// Interpreter command overriding discovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,

    /// Alternate source location. When the file exists its content wins over `code`.
    #[serde(default, alias = "scriptPath", skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Graph node this run belongs to. Defaults to the run id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

impl RunRequest {
    pub fn new(language: Language, code: impl Into<String>) -> Self {
        Self {
            language,
            code: code.into(),
            params: Map::new(),
            interpreter: None,
            path: None,
            node_id: None,
        }
    }

    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn with_interpreter(mut self, command: impl Into<String>) -> Self {
        self.interpreter = Some(command.into());
        self
    }

    /// Interpreter override, ignoring blank strings.
    pub fn interpreter_override(&self) -> Option<&str> {
        self.interpreter
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// True when there is nothing to run: blank `code` and no readable file at `path`.
    pub async fn is_empty(&self) -> bool {
        self.code.trim().is_empty() && !self.has_script_file().await
    }

    async fn has_script_file(&self) -> bool {
        match &self.path {
            Some(path) => tokio::fs::metadata(path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false),
            None => false,
        }
    }

    /// Source text to execute: the file at `path` if it exists, else `code`.
    pub async fn source(&self) -> Result<String, CellError> {
        if let Some(path) = &self.path {
            if self.has_script_file().await {
                return tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| CellError::Source {
                        path: path.clone(),
                        source,
                    });
            }
        }
        Ok(self.code.clone())
    }
}

// src/config.rs

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::engine::{ExecutorSettings, RunRequest};
use crate::language::Language;
use crate::resolver::SystemResolver;
use crate::util::resolve_relative_to;

/// Root configuration loaded from `flowboard.yaml`.
///
/// This file controls:
/// - Extra interpreter commands to try before the platform defaults
/// - Environment variables injected into every cell process
/// - Where run workspaces live and how long they are kept
/// - Run deadline and memory sampling
/// - HTTP runtime address and CLI output mode
///
/// Every section is optional; a missing file means all defaults.
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub interpreters: Interpreters,

    /// Environment variables injected into the cell process
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub workspace: WorkspaceConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

/// Interpreter candidates.
///
/// Example:
///
/// interpreters:
///   python: [/opt/conda/bin/python]
///   julia: [~/.juliaup/bin/julia]
#[derive(Debug, Deserialize, Default)]
pub struct Interpreters {
    #[serde(default)]
    pub python: Vec<String>,

    #[serde(default)]
    pub julia: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct WorkspaceConfig {
    /// Root directory for run workspaces. Defaults to `<tmp>/flowboard`.
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Workspaces older than this are pruned when the runtime starts.
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ExecutionConfig {
    /// Kill a cell that runs longer than this many milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Sample peak memory of each run.
    #[serde(default = "default_true")]
    pub track_memory: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            track_memory: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
        }
    }
}

fn default_addr() -> String {
    "127.0.0.1:8787".to_string()
}

/// Output configuration.
#[derive(Debug, Deserialize, Default)]
pub struct OutputConfig {
    #[serde(default)]
    pub mode: OutputMode,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    #[default]
    Simple,
    Pretty,
    Stdout,
}

impl Config {
    /// Load and parse a config file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let cfg: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse YAML config: {:?}", path))?;

        Ok(cfg)
    }

    /// Like `load`, but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.workspace
            .root
            .clone()
            .unwrap_or_else(crate::engine::workspace::default_root)
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            workspace_root: self.workspace_root(),
            timeout: self.execution.timeout_ms.map(Duration::from_millis),
            env: self.env.clone(),
            track_memory: self.execution.track_memory,
        }
    }

    /// Resolver seeded with the configured extra candidates.
    pub fn resolver(&self) -> SystemResolver {
        SystemResolver::new()
            .with_extra_candidates(Language::Python, self.interpreters.python.clone())
            .with_extra_candidates(Language::Julia, self.interpreters.julia.clone())
    }
}

/* ---------------- cell files ---------------- */

/// A single cell on disk (`*.cell.yaml`).
///
/// Example:
///
/// language: python
/// node_id: sma
/// path: sma.py        # or inline `code:`
/// params:
///   window: 5
///   inputs: [[1, 2, 3, 4]]
#[derive(Debug, Deserialize, Default)]
pub struct CellFile {
    #[serde(default)]
    pub language: Option<Language>,

    #[serde(default)]
    pub code: Option<String>,

    /// Script path, resolved relative to the cell file.
    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub params: Map<String, Value>,

    #[serde(default)]
    pub interpreter: Option<String>,

    #[serde(default)]
    pub node_id: Option<String>,
}

impl CellFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read cell file: {:?}", path))?;

        serde_yaml::from_str(&raw).with_context(|| format!("Failed to parse cell file: {:?}", path))
    }

    /// Build a run request. `cell_path` anchors relative script paths.
    pub fn into_request(self, cell_path: &Path) -> Result<RunRequest> {
        let script = self
            .path
            .as_deref()
            .map(|p| resolve_relative_to(cell_path, p))
            .transpose()?;

        let language = self
            .language
            .or_else(|| script.as_deref().and_then(Language::from_path))
            .with_context(|| format!("Cell file {:?} does not declare a language", cell_path))?;

        Ok(RunRequest {
            language,
            code: self.code.unwrap_or_default(),
            params: self.params,
            interpreter: self.interpreter,
            path: script,
            node_id: self.node_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_yaml_is_all_defaults() {
        let cfg: Config = serde_yaml::from_str("{}").unwrap();

        assert!(cfg.interpreters.python.is_empty());
        assert_eq!(cfg.server.addr, "127.0.0.1:8787");
        assert_eq!(cfg.output.mode, OutputMode::Simple);
        assert!(cfg.execution.track_memory);
        assert_eq!(cfg.executor_settings().timeout, None);
    }

    #[test]
    fn full_config_parses() {
        let cfg: Config = serde_yaml::from_str(
            r#"
interpreters:
  python: [/opt/conda/bin/python]
env:
  MY_TOKEN: abc
workspace:
  root: /var/tmp/fb
  max_age_secs: 3600
execution:
  timeout_ms: 1500
  track_memory: false
server:
  addr: 0.0.0.0:9000
output:
  mode: pretty
"#,
        )
        .unwrap();

        let settings = cfg.executor_settings();
        assert_eq!(settings.workspace_root, PathBuf::from("/var/tmp/fb"));
        assert_eq!(settings.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(settings.env.get("MY_TOKEN").map(String::as_str), Some("abc"));
        assert!(!settings.track_memory);
        assert_eq!(cfg.interpreters.python, vec!["/opt/conda/bin/python"]);
        assert_eq!(cfg.workspace.max_age_secs, Some(3600));
        assert_eq!(cfg.output.mode, OutputMode::Pretty);
    }

    #[test]
    fn missing_config_file_uses_defaults() {
        let cfg = Config::load_or_default(Path::new("/definitely/not/flowboard.yaml")).unwrap();
        assert_eq!(cfg.server.addr, "127.0.0.1:8787");
    }

    #[test]
    fn cell_file_resolves_script_and_language() {
        let dir = tempfile::tempdir().unwrap();
        let cell_path = dir.path().join("sma.cell.yaml");
        std::fs::write(
            &cell_path,
            "path: sma.py\nnode_id: sma\nparams:\n  window: 5\n  inputs: [[1, 2, 3]]\n",
        )
        .unwrap();

        let req = CellFile::load(&cell_path).unwrap().into_request(&cell_path).unwrap();

        assert_eq!(req.language, Language::Python);
        assert_eq!(req.path, Some(dir.path().join("sma.py")));
        assert_eq!(req.node_id.as_deref(), Some("sma"));
        assert_eq!(req.params["inputs"], json!([[1, 2, 3]]));
    }

    #[test]
    fn cell_file_without_language_or_path_is_rejected() {
        let cell = CellFile {
            code: Some("1 + 2".into()),
            ..CellFile::default()
        };
        assert!(cell.into_request(Path::new("inline.cell.yaml")).is_err());
    }
}

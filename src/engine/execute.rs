// src/engine/execute.rs

//! Execution orchestrator.
//!
//! One call to `Executor::execute`:
//! - resolves an interpreter (request override, resolver cache, fresh probe)
//! - creates a private workspace and writes script + `input.json` into it
//! - spawns the interpreter with side-channel paths in the environment
//! - collects stdout/stderr in memory until exit, cancellation or deadline
//! - reads the image / JSON artifacts and classifies the outcome
//!
//! Every failure ends up as an `ExecutionResult::Failure`; nothing escapes as
//! an error.

use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::{Pid, System};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::engine::registry::RunRegistry;
use crate::engine::request::RunRequest;
use crate::engine::workspace::{self, Workspace};
use crate::engine::ExecutionResult;
use crate::error::CellError;
use crate::execution_id::RunId;
use crate::language::Language;
use crate::metrics::{PeakMemory, RunMetrics, SAMPLE_EVERY};
use crate::resolver::InterpreterResolver;
use crate::shim::{cell_script, HarnessPaths, ENV_INPUT, ENV_OUTPUT_IMAGE, ENV_OUTPUT_JSON};

/// How long pipes are still drained once the child itself is gone.
///
/// A background process started by the cell inherits stdout/stderr and can
/// hold them open indefinitely.
const PIPE_GRACE: Duration = Duration::from_millis(500);

/// Knobs for the executor, usually built from `Config`.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub workspace_root: PathBuf,
    /// Kill runs that take longer than this.
    pub timeout: Option<Duration>,
    /// Extra environment for every child.
    pub env: BTreeMap<String, String>,
    pub track_memory: bool,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            workspace_root: workspace::default_root(),
            timeout: None,
            env: BTreeMap::new(),
            track_memory: true,
        }
    }
}

/// Everything known about a finished run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub node_id: String,
    /// Workspace directory; absent when the run failed before one was created.
    pub workspace: Option<PathBuf>,
    pub metrics: Option<RunMetrics>,
    pub result: ExecutionResult,
}

pub struct Executor {
    resolver: Arc<dyn InterpreterResolver>,
    registry: RunRegistry,
    settings: ExecutorSettings,
}

impl Executor {
    pub fn new(resolver: Arc<dyn InterpreterResolver>, settings: ExecutorSettings) -> Self {
        Self {
            resolver,
            registry: RunRegistry::new(),
            settings,
        }
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    pub fn resolver(&self) -> &Arc<dyn InterpreterResolver> {
        &self.resolver
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Run a cell and return only its result.
    pub async fn run(&self, request: RunRequest) -> ExecutionResult {
        self.execute(request).await.result
    }

    /// Run a cell.
    pub async fn execute(&self, request: RunRequest) -> RunOutcome {
        let run_id = RunId::new();
        let node_id = request
            .node_id
            .clone()
            .unwrap_or_else(|| run_id.to_string());

        let span = tracing::info_span!(
            "cell_run",
            run_id = %run_id,
            node_id = %node_id,
            language = %request.language,
        );

        self.execute_inner(run_id, node_id, request)
            .instrument(span)
            .await
    }

    async fn execute_inner(&self, run_id: RunId, node_id: String, request: RunRequest) -> RunOutcome {
        let mut outcome = RunOutcome {
            run_id: run_id.clone(),
            node_id: node_id.clone(),
            workspace: None,
            metrics: None,
            result: ExecutionResult::failure("Missing code", None),
        };

        if request.is_empty().await {
            return outcome;
        }

        // ---- interpreter ----
        let Some(command) = self.interpreter_for(&request).await else {
            let err = CellError::Discovery {
                language: request.language,
            };
            tracing::warn!(error = %err, "no interpreter");
            outcome.result = ExecutionResult::failure(err.to_string(), None);
            return outcome;
        };

        // ---- workspace ----
        let root = self.settings.workspace_root.clone();
        let ws = match tokio::task::spawn_blocking(move || Workspace::create(&root)).await {
            Ok(Ok(ws)) => ws,
            Ok(Err(err)) => {
                tracing::error!(error = %err, "workspace creation failed");
                outcome.result = ExecutionResult::failure(err.to_string(), None);
                return outcome;
            }
            Err(err) => {
                tracing::error!(error = %err, "workspace task failed");
                outcome.result = ExecutionResult::failure(err.to_string(), None);
                return outcome;
            }
        };
        outcome.workspace = Some(ws.dir().to_path_buf());

        let guard = self.registry.begin(run_id, &node_id, ws.dir());
        tracing::info!(%command, workspace = %ws.dir().display(), "run started");

        // ---- run ----
        match self.run_in(&command, &request, &ws, guard.token()).await {
            Ok(finished) => {
                let artifacts = Artifacts::collect(ws.paths()).await;
                outcome.metrics = Some(finished.metrics);
                outcome.result = classify(finished.ended, finished.stdout, finished.stderr, artifacts);
            }
            Err(err) => {
                tracing::error!(error = %err, "run failed before completion");
                outcome.result = ExecutionResult::failure(err.to_string(), None);
            }
        }

        drop(guard);

        tracing::info!(
            ok = outcome.result.is_ok(),
            duration_ms = outcome.metrics.map(|m| m.duration_ms),
            "run finished"
        );
        outcome
    }

    /// Override, then cache, then a fresh resolve.
    async fn interpreter_for(&self, request: &RunRequest) -> Option<String> {
        if let Some(cmd) = request.interpreter_override() {
            return Some(cmd.to_string());
        }
        if let Some(cmd) = self.resolver.cached(request.language) {
            return Some(cmd);
        }
        self.resolver.resolve(request.language).await
    }

    async fn run_in(
        &self,
        command: &str,
        request: &RunRequest,
        ws: &Workspace,
        cancel: CancellationToken,
    ) -> Result<Finished, CellError> {
        let paths = ws.paths();
        let script = ws.script_path(request.language);

        // ---- materialise ----
        let source = request.source().await?;
        write_file(&script, cell_script(request.language, &source, paths).as_bytes()).await?;
        write_file(&paths.input, &serde_json::to_vec(&request.params)?).await?;

        // ---- spawn ----
        let mut cmd = Command::new(command);
        cmd.args(invocation_args(request.language, command, &script))
            .current_dir(ws.dir())
            .envs(&self.settings.env)
            .env(ENV_INPUT, &paths.input)
            .env(ENV_OUTPUT_IMAGE, &paths.image)
            .env(ENV_OUTPUT_JSON, &paths.json)
            .env("PYTHONUNBUFFERED", "1")
            .env("FORCE_COLOR", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if std::env::var_os("MPLBACKEND").is_none() && !self.settings.env.contains_key("MPLBACKEND") {
            cmd.env("MPLBACKEND", "Agg");
        }

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|source| CellError::Spawn {
            command: command.to_string(),
            source,
        })?;

        let memory = match (self.settings.track_memory, child.id()) {
            (true, Some(pid)) => Some(PeakMemory::watch(pid, SAMPLE_EVERY)),
            _ => None,
        };

        let exited = CancellationToken::new();
        let stdout_task = tokio::spawn(read_all(child.stdout.take(), exited.clone()));
        let stderr_task = tokio::spawn(read_all(child.stderr.take(), exited.clone()));

        // ---- wait ----
        let waited = wait_for(&mut child, cancel, self.settings.timeout).await;
        exited.cancel();
        let ended = waited?;

        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        let max_rss_kb = match memory {
            Some(m) => m.finish().await,
            None => None,
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        Ok(Finished {
            ended,
            stdout,
            stderr,
            metrics: RunMetrics {
                duration_ms,
                max_rss_kb,
            },
        })
    }
}

/* ---------------- process plumbing ---------------- */

#[derive(Debug)]
enum Ended {
    Exited(ExitStatus),
    Cancelled,
    TimedOut(Duration),
}

struct Finished {
    ended: Ended,
    stdout: String,
    stderr: String,
    metrics: RunMetrics,
}

async fn wait_for(
    child: &mut Child,
    cancel: CancellationToken,
    timeout: Option<Duration>,
) -> Result<Ended, CellError> {
    let deadline = async {
        match timeout {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };

    let ended = tokio::select! {
        status = child.wait() => Ended::Exited(status.map_err(CellError::Wait)?),
        _ = cancel.cancelled() => Ended::Cancelled,
        _ = deadline => Ended::TimedOut(timeout.unwrap_or_default()),
    };

    if !matches!(ended, Ended::Exited(_)) {
        if let Some(pid) = child.id() {
            // Descendants first, while their parent links still point at the child.
            match tokio::task::spawn_blocking(move || kill_descendants(pid)).await {
                Ok(0) => {}
                Ok(n) => tracing::debug!(killed = n, "killed processes started by the cell"),
                Err(e) => tracing::warn!(error = %e, "descendant kill task failed"),
            }
        }
        if let Err(e) = child.kill().await {
            tracing::warn!(error = %e, "failed to kill child process");
        }
    }

    Ok(ended)
}

/// Kill every live process descended from `root`. Returns how many were signalled.
fn kill_descendants(root: u32) -> usize {
    let mut system = System::new();
    system.refresh_processes();

    let root = Pid::from_u32(root);
    let mut seen = HashSet::from([root]);
    let mut found = vec![root];
    let mut next = 0;
    while next < found.len() {
        let parent = found[next];
        next += 1;
        for (pid, process) in system.processes() {
            if process.parent() == Some(parent) && seen.insert(*pid) {
                found.push(*pid);
            }
        }
    }

    // Deepest first; the root itself is left to `Child::kill`.
    found
        .iter()
        .skip(1)
        .rev()
        .filter_map(|pid| system.process(*pid))
        .filter(|process| process.kill())
        .count()
}

/// Read a pipe to EOF, or until `PIPE_GRACE` after `exited` fires.
async fn read_all<R: AsyncRead + Unpin>(pipe: Option<R>, exited: CancellationToken) -> String {
    let mut buf = Vec::new();
    let Some(mut pipe) = pipe else {
        return String::new();
    };

    let cutoff = async {
        exited.cancelled().await;
        tokio::time::sleep(PIPE_GRACE).await;
    };
    tokio::pin!(cutoff);

    let mut chunk = [0u8; 8192];
    loop {
        tokio::select! {
            read = pipe.read(&mut chunk) => match read {
                Ok(0) => break,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    tracing::debug!(error = %e, "pipe read ended early");
                    break;
                }
            },
            _ = &mut cutoff => {
                tracing::debug!("pipe still held open after exit, keeping partial output");
                break;
            }
        }
    }

    String::from_utf8_lossy(&buf).into_owned()
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<(), CellError> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|source| CellError::Workspace {
            path: path.to_path_buf(),
            source,
        })
}

/// Arguments for `<command> ... <script>`.
///
/// The Windows `py` launcher needs `-3` ahead of the script to pick Python 3.
pub fn invocation_args(language: Language, command: &str, script: &Path) -> Vec<OsString> {
    let mut args = Vec::new();
    if language == Language::Python && is_py_launcher(command) {
        args.push(OsString::from("-3"));
    }
    args.push(script.as_os_str().to_os_string());
    args
}

fn is_py_launcher(command: &str) -> bool {
    Path::new(command)
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.eq_ignore_ascii_case("py"))
        .unwrap_or(false)
}

/* ---------------- artifacts + classification ---------------- */

#[derive(Debug, Default)]
struct Artifacts {
    image: Option<PathBuf>,
    data: Option<Value>,
}

impl Artifacts {
    async fn collect(paths: &HarnessPaths) -> Self {
        let image = tokio::fs::try_exists(&paths.image)
            .await
            .unwrap_or(false)
            .then(|| paths.image.clone());

        let data = match tokio::fs::read(&paths.json).await {
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::debug!(error = %e, "structured value artifact is not valid JSON");
                    None
                }
            },
            Err(_) => None,
        };

        Self { image, data }
    }
}

fn classify(ended: Ended, stdout: String, stderr: String, artifacts: Artifacts) -> ExecutionResult {
    let status = match ended {
        Ended::Exited(status) => status,
        Ended::Cancelled => {
            return ExecutionResult::failure(CellError::Cancelled.to_string(), Some(stdout));
        }
        Ended::TimedOut(limit) => {
            let ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
            return ExecutionResult::failure(CellError::TimedOut { ms }.to_string(), Some(stdout));
        }
    };

    classify_exit(status.code(), stdout, stderr, artifacts)
}

fn classify_exit(code: Option<i32>, stdout: String, stderr: String, artifacts: Artifacts) -> ExecutionResult {
    match code {
        Some(0) => ExecutionResult::Success {
            stdout,
            image_path: artifacts.image,
            data: artifacts.data,
            warning: (!stderr.is_empty()).then_some(stderr),
        },
        Some(code) => {
            tracing::warn!(code, "cell exited non-zero");
            let error = if stderr.is_empty() {
                format!("Process exited with code {}", code)
            } else {
                stderr
            };
            ExecutionResult::failure(error, Some(stdout))
        }
        None => {
            let error = if stderr.is_empty() {
                "Process terminated by signal".to_string()
            } else {
                stderr
            };
            ExecutionResult::failure(error, Some(stdout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::CompilerPaths;
    use async_trait::async_trait;
    use serde_json::json;

    /// Resolver that never finds anything.
    struct NoInterpreters;

    #[async_trait]
    impl InterpreterResolver for NoInterpreters {
        fn cached(&self, _language: Language) -> Option<String> {
            None
        }

        async fn resolve(&self, _language: Language) -> Option<String> {
            None
        }

        async fn detect_compilers(&self) -> CompilerPaths {
            CompilerPaths::default()
        }
    }

    fn executor(root: &Path, resolver: Arc<dyn InterpreterResolver>) -> Executor {
        Executor::new(
            resolver,
            ExecutorSettings {
                workspace_root: root.to_path_buf(),
                ..ExecutorSettings::default()
            },
        )
    }

    #[tokio::test]
    async fn missing_interpreter_fails_without_spawning() {
        let root = tempfile::tempdir().unwrap();
        let exec = executor(root.path(), Arc::new(NoInterpreters));

        let outcome = exec
            .execute(RunRequest::new(Language::Julia, "println(1)").with_node("n1"))
            .await;

        assert_eq!(outcome.result.error(), Some("No julia interpreter found"));
        assert!(outcome.workspace.is_none());
        assert!(outcome.metrics.is_none());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
        assert!(!exec.registry().is_running("n1"));
    }

    #[tokio::test]
    async fn empty_request_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let exec = executor(root.path(), Arc::new(NoInterpreters));

        let result = exec.run(RunRequest::new(Language::Python, "   ")).await;

        assert_eq!(result.error(), Some("Missing code"));
    }

    #[tokio::test]
    async fn blank_code_with_missing_script_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let exec = executor(root.path(), Arc::new(NoInterpreters));

        let mut req = RunRequest::new(Language::Python, "").with_interpreter("python3");
        req.path = Some(root.path().join("gone.py"));
        let outcome = exec.execute(req).await;

        assert_eq!(outcome.result.error(), Some("Missing code"));
        assert!(outcome.workspace.is_none());
    }

    #[tokio::test]
    async fn workspace_root_is_created_on_demand() {
        let base = tempfile::tempdir().unwrap();
        let root = base.path().join("nested").join("runs");
        let exec = executor(&root, Arc::new(NoInterpreters));

        let outcome = exec
            .execute(RunRequest::new(Language::Python, "1").with_interpreter("flowboard-no-such-python"))
            .await;

        let ws = outcome.workspace.unwrap();
        assert!(ws.starts_with(&root));
        assert!(ws.is_dir());
        assert!(!outcome.result.is_ok());
    }

    #[tokio::test]
    async fn vanished_command_is_a_terminal_failure() {
        let root = tempfile::tempdir().unwrap();
        let exec = executor(root.path(), Arc::new(NoInterpreters));

        let result = exec
            .run(
                RunRequest::new(Language::Python, "print(1)")
                    .with_interpreter("flowboard-no-such-python"),
            )
            .await;

        let error = result.error().unwrap();
        assert!(error.starts_with("Failed to start flowboard-no-such-python"), "{error}");
    }

    #[test]
    fn launcher_gets_version_flag() {
        let script = Path::new("/tmp/cell-1/cell.py");

        let args = invocation_args(Language::Python, "py", script);
        assert_eq!(args, vec![OsString::from("-3"), OsString::from("/tmp/cell-1/cell.py")]);

        let args = invocation_args(Language::Python, r"C:\Windows\py.exe", script);
        assert_eq!(args.len(), 2);

        let args = invocation_args(Language::Python, "python3", script);
        assert_eq!(args, vec![OsString::from("/tmp/cell-1/cell.py")]);

        let args = invocation_args(Language::Julia, "julia", Path::new("cell.jl"));
        assert_eq!(args, vec![OsString::from("cell.jl")]);
    }

    #[test]
    fn zero_exit_with_stderr_is_success_with_warning() {
        let artifacts = Artifacts {
            image: Some(PathBuf::from("/tmp/cell-1/output.png")),
            data: Some(json!({ "value": 3 })),
        };

        let result = classify_exit(Some(0), "out".into(), "careful\n".into(), artifacts);

        assert!(result.is_ok());
        assert_eq!(result.warning(), Some("careful\n"));
        assert_eq!(result.value(), Some(&json!(3)));
        assert_eq!(result.image_path(), Some(&PathBuf::from("/tmp/cell-1/output.png")));
    }

    #[test]
    fn non_zero_exit_prefers_stderr() {
        let result = classify_exit(Some(2), "partial".into(), "Traceback ...".into(), Artifacts::default());

        assert_eq!(result.error(), Some("Traceback ..."));
        assert_eq!(result.stdout(), Some("partial"));
    }

    #[test]
    fn non_zero_exit_without_stderr_names_code() {
        let result = classify_exit(Some(3), String::new(), String::new(), Artifacts::default());
        assert_eq!(result.error(), Some("Process exited with code 3"));
    }

    #[test]
    fn cancellation_and_deadline_are_failures() {
        let cancelled = classify(Ended::Cancelled, "so far".into(), String::new(), Artifacts::default());
        assert_eq!(cancelled.error(), Some("Run cancelled"));
        assert_eq!(cancelled.stdout(), Some("so far"));

        let timed_out = classify(
            Ended::TimedOut(Duration::from_millis(250)),
            String::new(),
            String::new(),
            Artifacts::default(),
        );
        assert_eq!(timed_out.error(), Some("Run timed out after 250ms"));
    }

    #[tokio::test]
    async fn invalid_json_artifact_means_no_value() {
        let dir = tempfile::tempdir().unwrap();
        let paths = HarnessPaths::in_dir(dir.path());
        std::fs::write(&paths.json, "{not json").unwrap();

        let artifacts = Artifacts::collect(&paths).await;

        assert!(artifacts.data.is_none());
        assert!(artifacts.image.is_none());
    }

    #[tokio::test]
    async fn artifacts_are_picked_up_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let paths = HarnessPaths::in_dir(dir.path());
        std::fs::write(&paths.json, r#"{"value": [1, 2]}"#).unwrap();
        std::fs::write(&paths.image, b"\x89PNG").unwrap();

        let artifacts = Artifacts::collect(&paths).await;

        assert_eq!(artifacts.data, Some(json!({ "value": [1, 2] })));
        assert_eq!(artifacts.image, Some(paths.image.clone()));
    }
}

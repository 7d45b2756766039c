// src/runner.rs

use crate::cli::{Cli, Command};
use crate::config::{CellFile, Config, OutputMode};
use crate::engine::{bind_inputs, prune_workspaces, Executor, RunOutcome, RunRequest};
use crate::language::Language;
use crate::resolver::InterpreterResolver;
use crate::util::{ensure_dir, parse_param, read_to_string};

use anyhow::{bail, Context, Result};
use notify::{RecursiveMode, Watcher};
use serde_json::Value;
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// What `flowboard run` was asked to execute.
#[derive(Debug, Clone, Default)]
pub struct RunSpec {
    pub cell: Option<PathBuf>,
    pub file: Option<PathBuf>,
    pub language: Option<String>,
    pub params: Vec<String>,
    pub inputs: Vec<String>,
    pub interpreter: Option<String>,
}

/// Entry point from `main.rs`.
pub async fn run(cli: Cli) -> Result<()> {
    let cfg = Config::load_or_default(&cli.config)?;

    match cli.command {
        Command::Init { language } => init_scaffold(language),

        Command::Prune { older_than } => {
            let age = older_than.or(cfg.workspace.max_age_secs).unwrap_or(0);
            let root = cfg.workspace_root();
            let removed = prune_workspaces(&root, Duration::from_secs(age))
                .with_context(|| format!("Failed to prune workspaces in {:?}", root))?;
            eprintln!("Removed {} workspace(s) from {}", removed, root.display());
            Ok(())
        }

        Command::Detect => {
            let resolver = cfg.resolver();
            let found = resolver.detect_interpreters().await;
            println!("{}", serde_json::to_string_pretty(&found)?);
            Ok(())
        }

        Command::Compilers => {
            let resolver = cfg.resolver();
            let found = resolver.detect_compilers().await;
            println!("{}", serde_json::to_string_pretty(&found)?);
            Ok(())
        }

        Command::Serve { addr } => {
            let addr = addr.unwrap_or_else(|| cfg.server.addr.clone());
            let executor = build_executor(&cfg).await;

            if let Some(secs) = cfg.workspace.max_age_secs {
                match prune_workspaces(&cfg.workspace_root(), Duration::from_secs(secs)) {
                    Ok(n) => tracing::info!(removed = n, "pruned old workspaces"),
                    Err(e) => tracing::warn!(error = %e, "workspace pruning failed"),
                }
            }

            crate::runtime::serve(&addr, executor).await
        }

        Command::Run {
            cell,
            file,
            language,
            params,
            inputs,
            interpreter,
            output,
            watch,
        } => {
            let mode = output.map(OutputMode::from).unwrap_or(cfg.output.mode);
            let spec = RunSpec {
                cell,
                file,
                language,
                params,
                inputs,
                interpreter,
            };

            // Validate up front so a bad flag fails before discovery runs.
            build_request(&spec)?;
            let executor = build_executor(&cfg).await;

            if watch {
                execute_with_watch(&executor, &spec, mode).await
            } else {
                let outcome = execute_once(&executor, &spec, mode).await?;
                if !outcome.result.is_ok() {
                    bail!("Cell failed");
                }
                Ok(())
            }
        }
    }
}

/// Executor with a warmed resolver.
pub async fn build_executor(cfg: &Config) -> Arc<Executor> {
    let resolver = Arc::new(cfg.resolver());
    resolver.warm().await;
    Arc::new(Executor::new(resolver, cfg.executor_settings()))
}

/* ---------------- request building ---------------- */

pub fn build_request(spec: &RunSpec) -> Result<RunRequest> {
    let language = spec
        .language
        .as_deref()
        .map(|l| l.parse::<Language>().map_err(anyhow::Error::msg))
        .transpose()?;

    let mut request = if let Some(cell) = &spec.cell {
        let mut request = CellFile::load(cell)?.into_request(cell)?;
        if let Some(language) = language {
            request.language = language;
        }
        request
    } else if let Some(file) = &spec.file {
        let language = language
            .or_else(|| Language::from_path(file))
            .with_context(|| format!("Cannot infer language of {:?}; pass --language", file))?;
        RunRequest::new(language, read_to_string(file)?)
    } else {
        bail!("Nothing to run: pass --cell <file.cell.yaml> or --file <script>");
    };

    for raw in &spec.params {
        let (key, value) = parse_param(raw)?;
        request.params.insert(key, value);
    }

    if !spec.inputs.is_empty() {
        let values = spec
            .inputs
            .iter()
            .map(|raw| {
                serde_json::from_str::<Value>(raw)
                    .with_context(|| format!("--input is not valid JSON: {}", raw))
            })
            .collect::<Result<Vec<_>>>()?;
        bind_inputs(&mut request.params, values);
    }

    if let Some(cmd) = &spec.interpreter {
        request.interpreter = Some(cmd.clone());
    }

    Ok(request)
}

fn source_label(spec: &RunSpec) -> String {
    spec.cell
        .as_ref()
        .or(spec.file.as_ref())
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "cell".to_string())
}

async fn execute_once(executor: &Executor, spec: &RunSpec, mode: OutputMode) -> Result<RunOutcome> {
    let request = build_request(spec)?;
    let outcome = executor.execute(request).await;
    let rendered = render_output(mode, &source_label(spec), &outcome, should_use_color())?;
    println!("{}", rendered);
    Ok(outcome)
}

/* ---------------- watch mode ---------------- */

async fn execute_with_watch(executor: &Executor, spec: &RunSpec, mode: OutputMode) -> Result<()> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let _ = tx.send(res);
    })
    .context("Failed to initialise file watcher")?;

    for path in watched_paths(spec)? {
        watcher
            .watch(&path, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {:?}", path))?;
    }

    loop {
        clear_screen();

        // Rebuild every time so edits to the cell file apply immediately
        if let Err(e) = execute_once(executor, spec, mode).await {
            eprintln!("Error: {e}");
        }

        // Block until something changes, then let the burst of events settle
        if rx.recv().await.is_none() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        while rx.try_recv().is_ok() {}
    }
}

fn watched_paths(spec: &RunSpec) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    if let Some(cell) = &spec.cell {
        paths.push(cell.clone());
        if let Some(script) = build_request(spec)?.path {
            if script.exists() {
                paths.push(script);
            }
        }
    }
    if let Some(file) = &spec.file {
        paths.push(file.clone());
    }
    Ok(paths)
}

fn clear_screen() {
    print!("\x1b[2J\x1b[H");
    let _ = std::io::stdout().flush();
}

/* ---------------- rendering ---------------- */

fn build_output_envelope(outcome: &RunOutcome) -> Result<Value> {
    let mut meta = serde_json::Map::new();
    meta.insert("runId".to_string(), Value::String(outcome.run_id.to_string()));
    meta.insert("nodeId".to_string(), Value::String(outcome.node_id.clone()));
    if let Some(ws) = &outcome.workspace {
        meta.insert("workspace".to_string(), Value::String(ws.display().to_string()));
    }
    if let Some(m) = &outcome.metrics {
        meta.insert("durationMs".to_string(), Value::from(m.duration_ms));
        meta.insert(
            "maxRssKb".to_string(),
            m.max_rss_kb.map(Value::from).unwrap_or(Value::Null),
        );
    }

    let mut envelope = serde_json::Map::new();
    envelope.insert("meta".to_string(), Value::Object(meta));
    envelope.insert(
        "result".to_string(),
        serde_json::to_value(&outcome.result).context("Failed to encode result")?,
    );
    Ok(Value::Object(envelope))
}

fn render_output(mode: OutputMode, label: &str, outcome: &RunOutcome, use_color: bool) -> Result<String> {
    match mode {
        OutputMode::Stdout => serde_json::to_string(&build_output_envelope(outcome)?)
            .context("Failed to format output as JSON"),
        OutputMode::Pretty => serde_json::to_string_pretty(&build_output_envelope(outcome)?)
            .context("Failed to format output as pretty JSON"),
        OutputMode::Simple => format_simple_output(label, outcome, use_color),
    }
}

fn format_simple_output(label: &str, outcome: &RunOutcome, use_color: bool) -> Result<String> {
    let result = &outcome.result;
    let ok = result.is_ok();
    let status = match (ok, result.warning().is_some()) {
        (true, false) => paint("OK", "32", use_color),
        (true, true) => paint("WARN", "33", use_color),
        (false, _) => paint("FAIL", "31", use_color),
    };

    let mut out = String::new();
    out.push_str(&format!("{} {}\n", status, label));
    out.push_str(&format!("run: {}\n", outcome.run_id));

    if let Some(ws) = &outcome.workspace {
        out.push_str(&format!("workspace: {}\n", ws.display()));
    }

    if let Some(m) = &outcome.metrics {
        out.push_str(&format!("time: {}ms\n", m.duration_ms));
        let mem = m
            .max_rss_kb
            .map(|v| format!("{}kb", v))
            .unwrap_or_else(|| "n/a".to_string());
        out.push_str(&format!("memory: {}\n", mem));
    }

    if let Some(image) = result.image_path() {
        out.push_str(&format!("image: {}\n", image.display()));
    }

    if let Some(error) = result.error() {
        out.push_str("error:\n");
        out.push_str(error.trim_end());
        out.push('\n');
    }

    if let Some(warning) = result.warning() {
        out.push_str("warning:\n");
        out.push_str(warning.trim_end());
        out.push('\n');
    }

    if let Some(stdout) = result.stdout().filter(|s| !s.trim().is_empty()) {
        out.push_str("stdout:\n");
        out.push_str(stdout.trim_end());
        out.push('\n');
    }

    if let Some(value) = result.value() {
        out.push_str("value:\n");
        let rendered =
            serde_json::to_string_pretty(value).context("Failed to format cell value")?;
        out.push_str(&rendered);
        out.push('\n');
    }

    Ok(out.trim_end().to_string())
}

fn should_use_color() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    std::io::stdout().is_terminal()
}

fn paint(text: &str, color: &str, use_color: bool) -> String {
    if use_color {
        format!("\x1b[{}m{}\x1b[0m", color, text)
    } else {
        text.to_string()
    }
}

/* ---------------- init scaffold ---------------- */

fn init_scaffold(language: Option<String>) -> Result<()> {
    write_if_missing(Path::new("flowboard.yaml"), default_config_yaml())?;

    let language = language.as_deref().unwrap_or("python");
    ensure_dir(Path::new("cells"))?;

    match language {
        "julia" => {
            write_if_missing(Path::new("cells/hello.jl"), default_cell_jl())?;
            write_if_missing(Path::new("cells/hello.cell.yaml"), &default_cell_yaml("hello.jl"))?;
        }
        _ => {
            write_if_missing(Path::new("cells/hello.py"), default_cell_py())?;
            write_if_missing(Path::new("cells/hello.cell.yaml"), &default_cell_yaml("hello.py"))?;
        }
    }

    Ok(())
}

fn write_if_missing(path: &Path, contents: &str) -> Result<()> {
    if path.exists() {
        eprintln!("{} already exists (skipping)", path.display());
        return Ok(());
    }
    std::fs::write(path, contents).with_context(|| format!("Failed to write {:?}", path))?;
    eprintln!("Created {}", path.display());
    Ok(())
}

fn default_config_yaml() -> &'static str {
    r#"# Extra interpreter commands, tried before the platform defaults.
interpreters:
  python: []
  julia: []

# Injected into every cell process.
env: {}

workspace:
  # root: /tmp/flowboard
  # Workspaces older than this are removed when `flowboard serve` starts.
  max_age_secs: 86400

execution:
  # timeout_ms: 30000
  track_memory: true

server:
  addr: 127.0.0.1:8787

output:
  mode: simple # simple | pretty | stdout
"#
}

fn default_cell_yaml(script: &str) -> String {
    format!(
        r#"node_id: hello
path: {script}
params:
  scale: 2
  inputs:
    - [1, 2, 3, 4]
"#
    )
}

fn default_cell_py() -> &'static str {
    r#"# `x` is bound to the first upstream series, `scale` comes from params.
print("scaling", x)
[v * scale for v in x]
"#
}

fn default_cell_jl() -> &'static str {
    r#"# Julia cells run as-is; parameters are in the JSON file named by FLOWBOARD_INPUT.
println("params file: ", ENV["FLOWBOARD_INPUT"])
println(sum([1, 2, 3, 4]) * 2)
"#
}

// src/resolver.rs

//! Interpreter and compiler discovery.
//!
//! Discovery walks an ordered candidate list and runs a cheap version probe
//! for each entry. The first candidate that exits with status zero wins. A
//! candidate that cannot even be started (missing executable) counts the same
//! as a non-zero exit and the search moves on.
//!
//! `SystemResolver` owns the cache of resolved commands. Construct it once per
//! process, call `warm()` at startup, and hand it to callers as
//! `Arc<dyn InterpreterResolver>`.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::RwLock;
use std::time::Duration;
use tokio::process::Command;

use crate::language::{Language, Platform};

/// Upper bound for a single version probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// A command plus the arguments used to probe it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub command: String,
    pub args: Vec<String>,
}

impl Candidate {
    pub fn new(command: &str, args: &[&str]) -> Self {
        Self {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// `<command> --version`
    pub fn version(command: &str) -> Self {
        Self::new(command, &["--version"])
    }
}

/// Default interpreter candidates, in priority order.
pub fn interpreter_candidates(language: Language, platform: Platform) -> Vec<Candidate> {
    match (language, platform) {
        (Language::Python, Platform::Windows) => vec![
            Candidate::new("py", &["-3", "-V"]),
            Candidate::version("python"),
            Candidate::version("python3"),
        ],
        (Language::Python, Platform::Unix) => {
            vec![Candidate::version("python3"), Candidate::version("python")]
        }
        (Language::Julia, _) => vec![Candidate::version("julia")],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compiler {
    Msvc,
    Gxx,
    Clangxx,
}

/// Compiler candidates. MSVC is only probed on Windows.
pub fn compiler_candidates(compiler: Compiler, platform: Platform) -> Vec<Candidate> {
    match compiler {
        Compiler::Gxx => vec![Candidate::version("g++")],
        Compiler::Clangxx => vec![Candidate::version("clang++")],
        Compiler::Msvc if platform == Platform::Windows => vec![Candidate::new("cl", &["/Bv"])],
        Compiler::Msvc => Vec::new(),
    }
}

/* ---------------- probing ---------------- */

/// Runs one version probe.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, candidate: &Candidate) -> bool;
}

/// Probes by actually spawning the candidate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessProber;

#[async_trait]
impl Prober for ProcessProber {
    async fn probe(&self, candidate: &Candidate) -> bool {
        let mut cmd = Command::new(&candidate.command);
        cmd.args(&candidate.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(PROBE_TIMEOUT, cmd.status()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                tracing::debug!(command = %candidate.command, error = %e, "probe could not start");
                false
            }
            Err(_) => {
                tracing::debug!(command = %candidate.command, "probe timed out");
                false
            }
        }
    }
}

/// Probe candidates strictly in order and return the first working command.
pub async fn first_working(prober: &dyn Prober, candidates: &[Candidate]) -> Option<String> {
    for candidate in candidates {
        if prober.probe(candidate).await {
            return Some(candidate.command.clone());
        }
    }
    None
}

/* ---------------- discovery results ---------------- */

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InterpreterPaths {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub python: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub julia: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompilerPaths {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msvc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gxx: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clangxx: Option<String>,
}

/* ---------------- resolver service ---------------- */

#[async_trait]
pub trait InterpreterResolver: Send + Sync {
    /// Last command resolved for `language`, if any. Never probes.
    fn cached(&self, language: Language) -> Option<String>;

    /// Probe candidates afresh. A hit replaces the cached command.
    async fn resolve(&self, language: Language) -> Option<String>;

    async fn detect_compilers(&self) -> CompilerPaths;

    /// Populate the cache for every language.
    async fn warm(&self) {
        for language in Language::ALL {
            let found = self.resolve(language).await;
            tracing::info!(%language, command = ?found, "interpreter discovery");
        }
    }

    async fn detect_interpreters(&self) -> InterpreterPaths {
        InterpreterPaths {
            python: self.resolve(Language::Python).await,
            julia: self.resolve(Language::Julia).await,
        }
    }
}

pub struct SystemResolver<P = ProcessProber> {
    prober: P,
    platform: Platform,
    extra: HashMap<Language, Vec<String>>,
    cache: RwLock<HashMap<Language, String>>,
}

impl SystemResolver<ProcessProber> {
    pub fn new() -> Self {
        Self::with_prober(ProcessProber, Platform::current())
    }
}

impl Default for SystemResolver<ProcessProber> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Prober> SystemResolver<P> {
    pub fn with_prober(prober: P, platform: Platform) -> Self {
        Self {
            prober,
            platform,
            extra: HashMap::new(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Extra commands tried (with `--version`) before the platform defaults.
    pub fn with_extra_candidates(mut self, language: Language, commands: Vec<String>) -> Self {
        self.extra.insert(language, commands);
        self
    }

    pub fn candidates(&self, language: Language) -> Vec<Candidate> {
        let mut list: Vec<Candidate> = self
            .extra
            .get(&language)
            .map(|cmds| cmds.iter().map(|c| Candidate::version(c)).collect())
            .unwrap_or_default();
        list.extend(interpreter_candidates(language, self.platform));
        list
    }

    async fn detect_compiler(&self, compiler: Compiler) -> Option<String> {
        first_working(&self.prober, &compiler_candidates(compiler, self.platform)).await
    }
}

#[async_trait]
impl<P: Prober> InterpreterResolver for SystemResolver<P> {
    fn cached(&self, language: Language) -> Option<String> {
        match self.cache.read() {
            Ok(cache) => cache.get(&language).cloned(),
            Err(poisoned) => poisoned.into_inner().get(&language).cloned(),
        }
    }

    async fn resolve(&self, language: Language) -> Option<String> {
        let found = first_working(&self.prober, &self.candidates(language)).await;

        if let Some(command) = &found {
            let mut cache = match self.cache.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            cache.insert(language, command.clone());
        }

        found
    }

    async fn detect_compilers(&self) -> CompilerPaths {
        CompilerPaths {
            msvc: self.detect_compiler(Compiler::Msvc).await,
            gxx: self.detect_compiler(Compiler::Gxx).await,
            clangxx: self.detect_compiler(Compiler::Clangxx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every probe; succeeds only for the listed commands.
    struct ScriptedProber {
        working: Vec<&'static str>,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedProber {
        fn new(working: Vec<&'static str>) -> Self {
            Self {
                working,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self, candidate: &Candidate) -> bool {
            self.seen.lock().unwrap().push(candidate.command.clone());
            self.working.contains(&candidate.command.as_str())
        }
    }

    #[async_trait]
    impl<'a> Prober for &'a ScriptedProber {
        async fn probe(&self, candidate: &Candidate) -> bool {
            (*self).probe(candidate).await
        }
    }

    #[tokio::test]
    async fn windows_python_order_stops_at_first_success() {
        let prober = ScriptedProber::new(vec!["python", "python3"]);
        let resolver = SystemResolver::with_prober(&prober, Platform::Windows);

        let found = resolver.resolve(Language::Python).await;

        assert_eq!(found.as_deref(), Some("python"));
        assert_eq!(prober.seen(), vec!["py", "python"]);
    }

    #[tokio::test]
    async fn windows_launcher_is_probed_with_version_flag() {
        let list = interpreter_candidates(Language::Python, Platform::Windows);
        assert_eq!(list[0], Candidate::new("py", &["-3", "-V"]));
        let commands: Vec<_> = list.iter().map(|c| c.command.as_str()).collect();
        assert_eq!(commands, vec!["py", "python", "python3"]);
    }

    #[tokio::test]
    async fn unix_prefers_python3() {
        let prober = ScriptedProber::new(vec!["python"]);
        let resolver = SystemResolver::with_prober(&prober, Platform::Unix);

        let found = resolver.resolve(Language::Python).await;

        assert_eq!(found.as_deref(), Some("python"));
        assert_eq!(prober.seen(), vec!["python3", "python"]);
    }

    #[tokio::test]
    async fn exhausted_list_yields_none_and_leaves_cache_alone() {
        let prober = ScriptedProber::new(vec![]);
        let resolver = SystemResolver::with_prober(&prober, Platform::Unix);

        assert_eq!(resolver.resolve(Language::Julia).await, None);
        assert_eq!(resolver.cached(Language::Julia), None);
    }

    #[tokio::test]
    async fn resolve_populates_cache_and_warm_covers_all_languages() {
        let prober = ScriptedProber::new(vec!["python3", "julia"]);
        let resolver = SystemResolver::with_prober(&prober, Platform::Unix);
        assert_eq!(resolver.cached(Language::Python), None);

        resolver.warm().await;

        assert_eq!(resolver.cached(Language::Python).as_deref(), Some("python3"));
        assert_eq!(resolver.cached(Language::Julia).as_deref(), Some("julia"));
    }

    #[tokio::test]
    async fn extra_candidates_are_tried_first() {
        let prober = ScriptedProber::new(vec!["/opt/py/bin/python", "python3"]);
        let resolver = SystemResolver::with_prober(&prober, Platform::Unix)
            .with_extra_candidates(Language::Python, vec!["/opt/py/bin/python".into()]);

        let found = resolver.resolve(Language::Python).await;

        assert_eq!(found.as_deref(), Some("/opt/py/bin/python"));
        assert_eq!(prober.seen(), vec!["/opt/py/bin/python"]);
    }

    #[tokio::test]
    async fn msvc_only_probed_on_windows() {
        let prober = ScriptedProber::new(vec!["cl", "g++"]);
        let unix = SystemResolver::with_prober(&prober, Platform::Unix);
        let found = unix.detect_compilers().await;
        assert_eq!(found.msvc, None);
        assert_eq!(found.gxx.as_deref(), Some("g++"));
        assert!(!prober.seen().contains(&"cl".to_string()));

        let windows = SystemResolver::with_prober(&prober, Platform::Windows);
        let found = windows.detect_compilers().await;
        assert_eq!(found.msvc.as_deref(), Some("cl"));
        assert_eq!(found.clangxx, None);
    }

    #[tokio::test]
    async fn missing_executable_counts_as_failure() {
        let candidates = vec![
            Candidate::version("flowboard-definitely-not-a-real-binary"),
        ];
        assert_eq!(first_working(&ProcessProber, &candidates).await, None);
    }

    #[test]
    fn discovery_json_omits_missing_entries() {
        let paths = InterpreterPaths {
            python: Some("python3".into()),
            julia: None,
        };
        assert_eq!(
            serde_json::to_value(paths).unwrap(),
            serde_json::json!({ "python": "python3" })
        );
    }
}

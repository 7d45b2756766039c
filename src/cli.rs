// src/cli.rs

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::OutputMode;

/// Flowboard cell runner (Python / Julia).
///
/// `flowboard.yaml` holds defaults.
/// CLI flags only override config values.
#[derive(Parser, Debug)]
#[command(name = "flowboard", version, disable_help_subcommand = true)]
pub struct Cli {
    /// Path to config file (missing file = defaults)
    #[arg(short, long, global = true, default_value = "flowboard.yaml")]
    pub config: PathBuf,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// All supported CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one cell and print its result.
    ///
    /// The cell comes from either a cell file (--cell) or a bare script (--file).
    Run {
        /// Cell file (YAML) with language, code/path and params
        #[arg(long, conflicts_with = "file")]
        cell: Option<PathBuf>,

        /// Script file to run (language inferred from extension)
        #[arg(long)]
        file: Option<PathBuf>,

        /// Language override: python | julia
        #[arg(long)]
        language: Option<String>,

        /// Parameter as key=value (repeatable). Values are parsed as JSON when possible.
        ///
        /// Example:
        /// --param window=5 --param title=Prices
        #[arg(long = "param")]
        params: Vec<String>,

        /// Upstream input value as JSON (repeatable, order preserved)
        ///
        /// Example:
        /// --input '[1, 2, 3]' --input '{"series": [4, 5]}'
        #[arg(long = "input")]
        inputs: Vec<String>,

        /// Interpreter command, bypassing discovery
        #[arg(long)]
        interpreter: Option<String>,

        /// Override output mode
        #[arg(long, value_enum)]
        output: Option<OutputArg>,

        /// Re-run when the cell or script changes.
        #[arg(long)]
        watch: bool,
    },

    /// Print discovered interpreters as JSON.
    Detect,

    /// Print discovered C++ compilers as JSON.
    Compilers,

    /// Start the HTTP runtime.
    Serve {
        /// Listen address (overrides server.addr)
        #[arg(long)]
        addr: Option<String>,
    },

    /// Delete old run workspaces.
    Prune {
        /// Minimum age in seconds (defaults to workspace.max_age_secs, else 0)
        #[arg(long)]
        older_than: Option<u64>,
    },

    /// Initialise a project scaffold.
    ///
    /// Creates:
    /// - flowboard.yaml
    /// - a sample cell file and script
    Init {
        /// Sample cell language
        ///
        /// Allowed values: python | julia
        #[arg(value_parser = ["python", "julia"])]
        language: Option<String>,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum OutputArg {
    Simple,
    Pretty,
    Stdout,
}

impl From<OutputArg> for OutputMode {
    fn from(arg: OutputArg) -> Self {
        match arg {
            OutputArg::Simple => OutputMode::Simple,
            OutputArg::Pretty => OutputMode::Pretty,
            OutputArg::Stdout => OutputMode::Stdout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_flags() {
        let cli = Cli::try_parse_from([
            "flowboard", "run", "--file", "a.py", "--param", "window=5", "--input", "[1,2]",
            "--input", "[3]", "--output", "pretty",
        ])
        .unwrap();

        match cli.command {
            Command::Run {
                file,
                params,
                inputs,
                output,
                watch,
                ..
            } => {
                assert_eq!(file, Some(PathBuf::from("a.py")));
                assert_eq!(params, vec!["window=5"]);
                assert_eq!(inputs, vec!["[1,2]", "[3]"]);
                assert!(matches!(output, Some(OutputArg::Pretty)));
                assert!(!watch);
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(cli.config, PathBuf::from("flowboard.yaml"));
    }

    #[test]
    fn cell_and_file_conflict() {
        let res = Cli::try_parse_from(["flowboard", "run", "--cell", "a.cell.yaml", "--file", "a.py"]);
        assert!(res.is_err());
    }

    #[test]
    fn init_rejects_unknown_language() {
        assert!(Cli::try_parse_from(["flowboard", "init", "ruby"]).is_err());
        assert!(Cli::try_parse_from(["flowboard", "init", "julia"]).is_ok());
    }
}

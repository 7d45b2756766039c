// src/main.rs

//! flowboard
//!
//! Entry point for the flowboard CLI.
//!
//! This binary runs Flowboard notebook cells (Python and Julia) locally and
//! hosts the HTTP runtime the UI talks to. It delegates all real work to the
//! `runner` module.
//!
//! Responsibilities of this file:
//! - Load `.env` and initialise logging
//! - Parse CLI arguments
//! - Hand off execution to the runner

use anyhow::Result;
use clap::Parser;
use flowboard::{cli, runner};

/// Program entry point.
///
/// Uses Tokio because the runner spawns and waits on interpreter processes
/// asynchronously.
#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // Logs go to stderr so stdout stays clean for results.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = cli::Cli::parse();

    runner::run(cli).await
}

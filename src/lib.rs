//! Flowboard cell execution engine.
//!
//! Runs notebook cells (Python, Julia) as isolated interpreter processes,
//! one throwaway workspace per run, and reports a uniform result.

pub mod auth;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution_id;
pub mod language;
pub mod metrics;
pub mod resolver;
pub mod runner;
pub mod runtime;
pub mod shim;
pub mod util;

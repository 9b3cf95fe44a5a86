//! Benchmark Orchestrator Library
//!
//! This library deploys a committee of consensus nodes onto a set of hosts,
//! drives transaction load against it, collects every process log and turns
//! the logs into throughput and latency figures. Parameter sweeps run one
//! configuration at a time; each configuration ends with either an
//! aggregated result or a typed failure.
//!
//! ## Architecture
//!
//! - `orchestrator`: per-configuration state machine, retries and aborts
//! - `remote`: transport seam (SSH or local processes) and fan-out executor
//! - `commands`: shell commands run on the hosts
//! - `committee`: key generation and the committee file
//! - `logs`: log line parser
//! - `metrics`: per-run summaries and cross-run aggregation
//! - `store`: on-disk layout of logs and results, report rendering
//! - `instance` and `settings`: fleet inventory and tool settings
//! - `cli` and `tasks`: command-line surface and its handlers

pub mod cli;
pub mod commands;
pub mod committee;
pub mod instance;
pub mod logs;
pub mod metrics;
pub mod orchestrator;
pub mod remote;
pub mod settings;
pub mod store;
pub mod tasks;
pub mod types;
pub mod utils;

pub use orchestrator::{Orchestrator, Policy, Shutdown, SweepManifest};
pub use types::{
    AggregatedResult, BenchmarkError, BenchmarkResult, LatencyStats, OrchestrationError,
    RunOutcome, RunResult, SweepEntry,
};

/// Initialize logging for the orchestrator
///
/// Defaults to `info`; `RUST_LOG` overrides the filter.
pub fn init_logging() -> BenchmarkResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .format_module_path(false)
        .format_target(false)
        .try_init()
        .map_err(|e| {
            BenchmarkError::Initialization(format!("Failed to initialize logging: {}", e))
        })?;

    Ok(())
}

//! Common types and constants shared by the benchmark orchestrator and the
//! benchmarked node.
//!
//! This crate holds the configuration model (benchmark parameters, node
//! parameters and parameter sweeps) together with the log line contract the
//! node emits and the log parser consumes.

pub mod config;
pub mod constants;
pub mod sweep;

pub use config::{BenchConfig, ConfigError, NodeConfig};
pub use sweep::{OneOrMany, Sweep};

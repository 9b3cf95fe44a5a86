//! Type definitions and data structures for benchmark orchestration
//!
//! This module contains the error taxonomy used throughout the orchestrator,
//! the record of a single executed attempt, and the aggregated result produced
//! per configuration.

use std::collections::BTreeMap;

use bench_common::{BenchConfig, ConfigError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{instance::Host, remote::RemoteError};

/// Result type for benchmark operations
pub type BenchmarkResult<T> = Result<T, BenchmarkError>;

/// Errors that stop the tool itself (as opposed to a single configuration)
#[derive(Error, Debug)]
pub enum BenchmarkError {
    #[error("Initialization error: {0}")]
    Initialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("General error: {0}")]
    General(#[from] anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Interrupted: {pending} configuration(s) not run")]
    Interrupted { pending: usize },
}

/// Why a configuration (or one attempt of it) did not produce a result
///
/// Every failure is attached to the configuration it happened in and
/// reported next to the successful results; none of them aborts a sweep.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrchestrationError {
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("deployment failed on {hosts:?}: {reason}")]
    DeploymentFailure { hosts: Vec<Host>, reason: String },

    #[error("launch failed on {hosts:?}: {reason}")]
    LaunchFailure { hosts: Vec<Host>, reason: String },

    #[error("{} of {total_hosts} hosts exited early: {failed_hosts:?}", .failed_hosts.len())]
    RuntimeFailure {
        failed_hosts: Vec<Host>,
        total_hosts: usize,
        fatal: bool,
    },

    #[error("truncated logs: {logs:?}")]
    LogTruncation { logs: Vec<String> },

    #[error("aggregation failed: {reason}")]
    AggregationFailure { reason: String },

    #[error("{operation} timed out on {hosts:?}")]
    TransportTimeout { hosts: Vec<Host>, operation: String },

    #[error("gave up after {attempts} attempts, last failure: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<OrchestrationError>,
    },

    #[error("aborted by operator")]
    Aborted,
}

impl OrchestrationError {
    /// Whether another attempt of the same run may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::DeploymentFailure { .. }
            | Self::LaunchFailure { .. }
            | Self::LogTruncation { .. }
            | Self::TransportTimeout { .. } => true,
            Self::RuntimeFailure { fatal, .. } => !fatal,
            Self::InvalidConfig { .. }
            | Self::AggregationFailure { .. }
            | Self::RetriesExhausted { .. }
            | Self::Aborted => false,
        }
    }
}

impl From<ConfigError> for OrchestrationError {
    fn from(e: ConfigError) -> Self {
        Self::InvalidConfig {
            reason: e.to_string(),
        }
    }
}

/// Classification of one executed attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "cause", rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    PartialFailure(OrchestrationError),
    Fatal(OrchestrationError),
}

impl RunOutcome {
    /// Classify a failure by its transience
    #[must_use]
    pub fn failure(cause: OrchestrationError) -> Self {
        if cause.is_transient() {
            Self::PartialFailure(cause)
        } else {
            Self::Fatal(cause)
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// One executed attempt of one run of a configuration
#[derive(Debug, Clone)]
pub struct RunResult {
    pub config: BenchConfig,
    /// Run number within the configuration (1-based)
    pub run: u32,
    /// Attempt number within the run (1-based)
    pub attempt: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Raw log text per process (e.g. `primary-0` -> text)
    pub logs: BTreeMap<String, String>,
    pub outcome: RunOutcome,
}

/// Latency statistics over pooled samples
///
/// All values are in milliseconds. Percentiles use nearest-rank selection.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct LatencyStats {
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

/// Final metrics of one configuration, averaged across its valid runs
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AggregatedResult {
    pub config: BenchConfig,
    /// Mean committed transactions per second across valid runs
    pub throughput: f64,
    /// Population standard deviation of per-run throughput
    pub throughput_stddev: f64,
    /// Mean committed bytes per second
    pub throughput_bps: f64,
    /// End-to-end latency; absent when no sample was committed
    pub latency: Option<LatencyStats>,
    /// Latency samples pooled into the statistics
    pub sample_count: u64,
    /// Samples injected but never committed
    pub dropped_samples: u64,
    /// Samples whose commit preceded their injection (clock skew)
    pub skewed_samples: u64,
    pub runs_included: u32,
    pub runs_discarded: u32,
}

/// One entry of a sweep report, in expansion order
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SweepEntry {
    pub config: BenchConfig,
    pub result: Result<AggregatedResult, OrchestrationError>,
}

impl SweepEntry {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transience_classification() {
        let host = Host::from("10.0.0.1");
        assert!(OrchestrationError::DeploymentFailure {
            hosts: vec![host.clone()],
            reason: "scp".into()
        }
        .is_transient());
        assert!(OrchestrationError::TransportTimeout {
            hosts: vec![host.clone()],
            operation: "upload".into()
        }
        .is_transient());
        assert!(!OrchestrationError::InvalidConfig {
            reason: "faults".into()
        }
        .is_transient());

        let minority = OrchestrationError::RuntimeFailure {
            failed_hosts: vec![host.clone()],
            total_hosts: 4,
            fatal: false,
        };
        let majority = OrchestrationError::RuntimeFailure {
            failed_hosts: vec![host],
            total_hosts: 1,
            fatal: true,
        };
        assert!(matches!(
            RunOutcome::failure(minority),
            RunOutcome::PartialFailure(_)
        ));
        assert!(matches!(RunOutcome::failure(majority), RunOutcome::Fatal(_)));
    }

    #[test]
    fn test_error_serialization_is_tagged() {
        let e = OrchestrationError::RetriesExhausted {
            attempts: 3,
            last: Box::new(OrchestrationError::LogTruncation {
                logs: vec!["worker-0-0".into()],
            }),
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["kind"], "retries_exhausted");
        assert_eq!(json["last"]["kind"], "log_truncation");

        let back: OrchestrationError = serde_json::from_value(json).unwrap();
        assert_eq!(back, e);
    }
}

//! Benchmark and node configuration
//!
//! `BenchConfig` describes one concrete benchmark run (committee shape and
//! load), `NodeConfig` the protocol parameters written to every node's
//! parameter file.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::MIN_TX_SIZE;

/// Reasons a configuration is rejected before anything touches the fleet
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cannot tolerate {faults} faults with only {nodes} nodes (need nodes > faults)")]
    FaultsExceedNodes { faults: u32, nodes: u32 },

    #[error("benchmark duration must be greater than zero")]
    ZeroDuration,

    #[error("{0} must be greater than zero")]
    NonPositive(&'static str),

    #[error("transaction size {size} B is below the minimum of {min} B")]
    TxTooSmall { size: u64, min: u64 },

    #[error("sweep field `{0}` has no candidate values")]
    EmptySweepField(&'static str),
}

/// One concrete benchmark configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Number of crashed authorities (booted never)
    pub faults: u32,
    /// Committee size
    pub nodes: u32,
    /// Workers per authority
    pub workers: u32,
    /// Aggregate input rate (tx/s) across all load generators
    pub rate: u64,
    /// Transaction size in bytes
    pub tx_size: u64,
    /// Benchmark duration in seconds
    pub duration: u64,
    /// Run primary and workers of an authority on the same host
    pub collocate: bool,
    /// Repetitions averaged into one result
    pub runs: u32,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            faults: 0,
            nodes: 4,
            workers: 1,
            rate: 50_000,
            tx_size: 512,
            duration: 20,
            collocate: true,
            runs: 1,
        }
    }
}

impl BenchConfig {
    /// Check the invariants a run needs before any remote action
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nodes == 0 {
            return Err(ConfigError::NonPositive("nodes"));
        }
        if self.nodes <= self.faults {
            return Err(ConfigError::FaultsExceedNodes {
                faults: self.faults,
                nodes: self.nodes,
            });
        }
        if self.workers == 0 {
            return Err(ConfigError::NonPositive("workers"));
        }
        if self.duration == 0 {
            return Err(ConfigError::ZeroDuration);
        }
        if self.runs == 0 {
            return Err(ConfigError::NonPositive("runs"));
        }
        if self.tx_size < MIN_TX_SIZE {
            return Err(ConfigError::TxTooSmall {
                size: self.tx_size,
                min: MIN_TX_SIZE,
            });
        }
        Ok(())
    }

    /// Authorities that are actually booted
    #[must_use]
    pub fn live_nodes(&self) -> u32 {
        self.nodes.saturating_sub(self.faults)
    }

    /// Hosts needed to lay out the whole committee
    #[must_use]
    pub fn hosts_required(&self) -> usize {
        if self.collocate {
            self.nodes as usize
        } else {
            self.nodes as usize * (self.workers as usize + 1)
        }
    }

    /// Input rate of a single load generator (one per live worker)
    #[must_use]
    pub fn rate_per_client(&self) -> u64 {
        let clients = u64::from(self.live_nodes()) * u64::from(self.workers);
        if clients == 0 {
            0
        } else {
            self.rate.div_ceil(clients)
        }
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration)
    }

    /// Filesystem-safe identifier, stable across runs of the same configuration
    #[must_use]
    pub fn key(&self) -> String {
        format!(
            "bench-{}-{}-{}-{}-{}-{}-{}",
            self.faults,
            self.nodes,
            self.workers,
            if self.collocate { "c" } else { "s" },
            self.rate,
            self.tx_size,
            self.duration
        )
    }
}

impl fmt::Display for BenchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} nodes ({} faulty), {} worker(s){}, {} tx/s of {} B for {}s x{}",
            self.nodes,
            self.faults,
            self.workers,
            if self.collocate { " collocated" } else { "" },
            self.rate,
            self.tx_size,
            self.duration,
            self.runs
        )
    }
}

/// Protocol parameters written verbatim to each node's parameter file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Header size in bytes
    pub header_size: u64,
    /// Maximum delay before sealing a header (ms)
    pub max_header_delay: u64,
    /// Garbage collection depth (rounds)
    pub gc_depth: u64,
    /// Delay before re-requesting missing data (ms)
    pub sync_retry_delay: u64,
    /// Number of nodes asked when re-requesting
    pub sync_retry_nodes: u64,
    /// Batch size in bytes
    pub batch_size: u64,
    /// Maximum delay before sealing a batch (ms)
    pub max_batch_delay: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            header_size: 1_000,
            max_header_delay: 200,
            gc_depth: 50,
            sync_retry_delay: 10_000,
            sync_retry_nodes: 3,
            batch_size: 500_000,
            max_batch_delay: 200,
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("header_size", self.header_size),
            ("max_header_delay", self.max_header_delay),
            ("gc_depth", self.gc_depth),
            ("sync_retry_delay", self.sync_retry_delay),
            ("sync_retry_nodes", self.sync_retry_nodes),
            ("batch_size", self.batch_size),
            ("max_batch_delay", self.max_batch_delay),
        ];
        match fields.iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(ConfigError::NonPositive(name)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bench_config_validation() {
        let config = BenchConfig::default();
        assert!(config.validate().is_ok());

        let bad = BenchConfig {
            faults: 4,
            ..config
        };
        assert_eq!(
            bad.validate(),
            Err(ConfigError::FaultsExceedNodes { faults: 4, nodes: 4 })
        );

        let bad = BenchConfig {
            duration: 0,
            ..config
        };
        assert_eq!(bad.validate(), Err(ConfigError::ZeroDuration));

        let bad = BenchConfig {
            nodes: 0,
            faults: 0,
            ..config
        };
        assert_eq!(bad.validate(), Err(ConfigError::NonPositive("nodes")));

        let bad = BenchConfig {
            tx_size: 8,
            ..config
        };
        assert!(matches!(bad.validate(), Err(ConfigError::TxTooSmall { .. })));

        // a zero rate is a valid (idle) benchmark
        let idle = BenchConfig { rate: 0, ..config };
        assert!(idle.validate().is_ok());
    }

    #[test]
    fn test_layout_helpers() {
        let config = BenchConfig {
            faults: 1,
            nodes: 4,
            workers: 2,
            rate: 100_000,
            collocate: false,
            ..BenchConfig::default()
        };
        assert_eq!(config.live_nodes(), 3);
        assert_eq!(config.hosts_required(), 12);
        // 100_000 / (3 * 2) rounded up
        assert_eq!(config.rate_per_client(), 16_667);

        let collocated = BenchConfig {
            collocate: true,
            ..config
        };
        assert_eq!(collocated.hosts_required(), 4);
    }

    #[test]
    fn test_node_config_positivity() {
        assert!(NodeConfig::default().validate().is_ok());

        let bad = NodeConfig {
            gc_depth: 0,
            ..NodeConfig::default()
        };
        assert_eq!(bad.validate(), Err(ConfigError::NonPositive("gc_depth")));
    }

    #[test]
    fn test_node_config_file_format() {
        let json = serde_json::to_value(NodeConfig::default()).unwrap();
        assert_eq!(json["header_size"], 1_000);
        assert_eq!(json["max_batch_delay"], 200);
        assert_eq!(json.as_object().unwrap().len(), 7);
    }
}

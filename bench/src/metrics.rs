//! Metrics aggregation
//!
//! Two stages: [`summarize_events`] folds the events of every process of one
//! run into a [`RunSummary`]; [`aggregate_runs`] averages the valid summaries
//! of one configuration into an [`AggregatedResult`].
//!
//! Throughput is measured over the commit window (first to last unique
//! commit), not the configured duration, since processes start with skew.
//! Latency percentiles are taken over the pooled samples of all valid runs.

use std::collections::{BTreeMap, HashMap};

use bench_common::BenchConfig;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    logs::{EventKind, LogParser, ParsedEvent},
    types::{AggregatedResult, OrchestrationError, RunResult},
    utils::{build_latency_stats, calculate_average, calculate_std_dev},
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregationError {
    #[error("no runs to aggregate")]
    NoRuns,

    #[error("all {discarded} run(s) were discarded")]
    AllRunsDiscarded { discarded: u32 },
}

impl From<AggregationError> for OrchestrationError {
    fn from(e: AggregationError) -> Self {
        Self::AggregationFailure {
            reason: e.to_string(),
        }
    }
}

/// Measurements of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique committed blocks
    pub blocks: u64,
    /// Transactions in unique committed blocks
    pub transactions: u64,
    /// Seconds between the first and last unique commit
    pub window_secs: f64,
    /// Committed tx/s; `None` without at least two distinct commit instants
    pub throughput: Option<f64>,
    /// End-to-end latency of matched samples (ms)
    pub latencies_ms: Vec<f64>,
    pub dropped_samples: u64,
    pub skewed_samples: u64,
    /// Errors reported by the processes
    pub errors: u64,
    /// Tagged lines that could not be parsed
    pub malformed_lines: u64,
    /// Processes whose log lacks the terminal marker
    pub truncated_logs: Vec<String>,
}

impl RunSummary {
    /// Whether the run may be averaged into a result
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.truncated_logs.is_empty() && self.throughput.is_some()
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, " Committed blocks: {}", self.blocks)?;
        writeln!(f, " Committed transactions: {}", self.transactions)?;
        writeln!(f, " Commit window: {:.3} s", self.window_secs)?;
        match self.throughput {
            Some(tps) => writeln!(f, " Throughput: {tps:.0} tx/s")?,
            None => writeln!(f, " Throughput: undefined")?,
        }
        match build_latency_stats(&self.latencies_ms) {
            Some(stats) => writeln!(
                f,
                " Latency: mean {:.0} ms, p50 {:.0} ms, p99 {:.0} ms ({} samples)",
                stats.mean_ms,
                stats.p50_ms,
                stats.p99_ms,
                self.latencies_ms.len()
            )?,
            None => writeln!(f, " Latency: no samples")?,
        }
        writeln!(
            f,
            " Samples dropped/skewed: {}/{}",
            self.dropped_samples, self.skewed_samples
        )?;
        writeln!(
            f,
            " Errors: {} ({} malformed lines)",
            self.errors, self.malformed_lines
        )?;
        if !self.truncated_logs.is_empty() {
            writeln!(f, " Truncated logs: {}", self.truncated_logs.join(", "))?;
        }
        Ok(())
    }
}

struct Commit {
    at: DateTime<Utc>,
    transactions: u64,
}

/// Fold the events of every process of one run
pub fn summarize_events(events: impl IntoIterator<Item = ParsedEvent>) -> RunSummary {
    let mut summary = RunSummary::default();
    let mut commits: HashMap<String, Commit> = HashMap::new();
    let mut injected: BTreeMap<u64, DateTime<Utc>> = BTreeMap::new();
    let mut sample_commits: HashMap<u64, DateTime<Utc>> = HashMap::new();

    for event in events {
        match event.kind {
            EventKind::BlockCommitted {
                digest,
                transactions,
                samples,
                ..
            } => {
                let Some(at) = event.timestamp else { continue };
                commits
                    .entry(digest)
                    .and_modify(|c| c.at = c.at.min(at))
                    .or_insert(Commit { at, transactions });
                for id in samples {
                    sample_commits
                        .entry(id)
                        .and_modify(|t| *t = (*t).min(at))
                        .or_insert(at);
                }
            }
            EventKind::TxSampled { sample_id, .. } => {
                let Some(at) = event.timestamp else { continue };
                injected
                    .entry(sample_id)
                    .and_modify(|t| *t = (*t).min(at))
                    .or_insert(at);
            }
            EventKind::ErrorLogged { malformed, .. } => {
                if malformed {
                    summary.malformed_lines += 1;
                } else {
                    summary.errors += 1;
                }
            }
            EventKind::LogTruncated => summary.truncated_logs.push(event.node_id),
        }
    }

    summary.blocks = commits.len() as u64;
    summary.transactions = commits.values().map(|c| c.transactions).sum();
    let first = commits.values().map(|c| c.at).min();
    let last = commits.values().map(|c| c.at).max();
    if let (Some(first), Some(last)) = (first, last) {
        let window = (last - first).num_microseconds().unwrap_or(i64::MAX) as f64 / 1e6;
        summary.window_secs = window;
        if window > 0.0 {
            summary.throughput = Some(summary.transactions as f64 / window);
        }
    }

    for (id, sent) in injected {
        match sample_commits.get(&id) {
            Some(&committed) => {
                let latency_ms =
                    (committed - sent).num_microseconds().unwrap_or(i64::MAX) as f64 / 1e3;
                if latency_ms < 0.0 {
                    summary.skewed_samples += 1;
                } else {
                    summary.latencies_ms.push(latency_ms);
                }
            }
            None => summary.dropped_samples += 1,
        }
    }

    summary.truncated_logs.sort();
    summary
}

/// Parse and fold raw logs keyed by process name
pub fn summarize_logs(logs: &BTreeMap<String, String>) -> RunSummary {
    let parsers: Vec<LogParser> = logs
        .iter()
        .map(|(name, text)| LogParser::new(name.as_str(), text.as_str()))
        .collect();
    summarize_events(parsers.iter().flat_map(LogParser::events))
}

pub fn summarize_run(run: &RunResult) -> RunSummary {
    summarize_logs(&run.logs)
}

/// Average the runs of one configuration
///
/// `failed_runs` counts runs that never produced logs (retries exhausted);
/// they are reported as discarded.
pub fn aggregate_runs(
    config: &BenchConfig,
    summaries: &[RunSummary],
    failed_runs: u32,
) -> Result<AggregatedResult, AggregationError> {
    if summaries.is_empty() && failed_runs == 0 {
        return Err(AggregationError::NoRuns);
    }

    let valid: Vec<&RunSummary> = summaries.iter().filter(|s| s.is_valid()).collect();
    let discarded = (summaries.len() - valid.len()) as u32 + failed_runs;
    debug!(
        "Aggregating {}: {} valid run(s), {} discarded",
        config.key(),
        valid.len(),
        discarded
    );

    let throughputs: Vec<f64> = valid.iter().filter_map(|s| s.throughput).collect();
    let (Some(throughput), Some(throughput_stddev)) = (
        calculate_average(&throughputs),
        calculate_std_dev(&throughputs),
    ) else {
        return Err(AggregationError::AllRunsDiscarded { discarded });
    };

    let pooled: Vec<f64> = valid
        .iter()
        .flat_map(|s| s.latencies_ms.iter().copied())
        .collect();

    Ok(AggregatedResult {
        config: *config,
        throughput,
        throughput_stddev,
        throughput_bps: throughput * config.tx_size as f64,
        latency: build_latency_stats(&pooled),
        sample_count: pooled.len() as u64,
        dropped_samples: valid.iter().map(|s| s.dropped_samples).sum(),
        skewed_samples: valid.iter().map(|s| s.skewed_samples).sum(),
        runs_included: valid.len() as u32,
        runs_discarded: discarded,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

    use super::*;

    fn at(secs: f64) -> Option<DateTime<Utc>> {
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).single()?;
        Some(base + Duration::microseconds((secs * 1e6) as i64))
    }

    fn commit(node: &str, secs: f64, digest: &str, tx: u64, samples: &[u64]) -> ParsedEvent {
        ParsedEvent {
            node_id: node.into(),
            timestamp: at(secs),
            kind: EventKind::BlockCommitted {
                round: 1,
                digest: digest.into(),
                transactions: tx,
                samples: samples.to_vec(),
            },
        }
    }

    fn sample(node: &str, secs: f64, id: u64) -> ParsedEvent {
        ParsedEvent {
            node_id: node.into(),
            timestamp: at(secs),
            kind: EventKind::TxSampled {
                sample_id: id,
                size: 512,
            },
        }
    }

    fn truncated(node: &str) -> ParsedEvent {
        ParsedEvent {
            node_id: node.into(),
            timestamp: None,
            kind: EventKind::LogTruncated,
        }
    }

    #[test]
    fn test_throughput_uses_commit_window() {
        let summary = summarize_events(vec![
            commit("primary-0", 0.0, "a", 30, &[]),
            commit("primary-0", 10.0, "b", 30, &[]),
            commit("primary-0", 20.0, "c", 30, &[]),
        ]);
        assert_eq!(summary.transactions, 90);
        assert_eq!(summary.window_secs, 20.0);
        assert_eq!(summary.throughput, Some(4.5));
        assert!(summary.is_valid());
    }

    #[test]
    fn test_commits_deduplicated_across_nodes() {
        let summary = summarize_events(vec![
            commit("primary-0", 0.0, "a", 30, &[]),
            commit("primary-1", 0.5, "a", 30, &[]),
            commit("primary-1", 10.0, "b", 30, &[]),
            commit("primary-0", 10.2, "b", 30, &[]),
        ]);
        assert_eq!(summary.blocks, 2);
        assert_eq!(summary.transactions, 60);
        assert_eq!(summary.throughput, Some(6.0));
    }

    #[test]
    fn test_single_commit_instant_has_no_throughput() {
        let summary = summarize_events(vec![
            commit("primary-0", 3.0, "a", 30, &[]),
            commit("primary-1", 3.0, "a", 30, &[]),
        ]);
        assert_eq!(summary.throughput, None);
        assert!(!summary.is_valid());
        assert!(!summarize_events(Vec::new()).is_valid());
    }

    #[test]
    fn test_latency_matching() {
        let summary = summarize_events(vec![
            sample("client-0-0", 1.0, 1),
            sample("client-1-0", 1.5, 2),
            sample("client-0-0", 2.0, 3),
            // committed before it was sent: clock skew
            sample("client-1-0", 9.0, 4),
            commit("primary-0", 1.25, "a", 10, &[1]),
            commit("primary-1", 1.75, "a", 10, &[1, 2]),
            commit("primary-0", 8.0, "b", 10, &[4]),
        ]);
        assert_eq!(summary.latencies_ms.len(), 2);
        assert!((summary.latencies_ms[0] - 250.0).abs() < 1e-9);
        assert!((summary.latencies_ms[1] - 250.0).abs() < 1e-9);
        assert_eq!(summary.dropped_samples, 1);
        assert_eq!(summary.skewed_samples, 1);
    }

    #[test]
    fn test_truncation_and_errors_are_counted() {
        let summary = summarize_events(vec![
            commit("primary-0", 0.0, "a", 10, &[]),
            commit("primary-0", 1.0, "b", 10, &[]),
            truncated("worker-0-0"),
            ParsedEvent {
                node_id: "worker-0-0".into(),
                timestamp: None,
                kind: EventKind::ErrorLogged {
                    line: "Committed B".into(),
                    malformed: true,
                },
            },
        ]);
        assert_eq!(summary.truncated_logs, vec!["worker-0-0".to_string()]);
        assert_eq!(summary.malformed_lines, 1);
        assert!(summary.throughput.is_some());
        assert!(!summary.is_valid());
    }

    #[test]
    fn test_summarize_logs_from_text() {
        let logs = BTreeMap::from([
            (
                "client-0-0".to_string(),
                "[2026-03-01T10:00:00Z INFO  client] Sending sample transaction 1 (512 B)\n\
                 [2026-03-01T10:00:09Z INFO  client] Benchmark ended\n"
                    .to_string(),
            ),
            (
                "primary-0".to_string(),
                "[2026-03-01T10:00:00.400Z INFO  primary] Committed B1(x) -> 100 tx samples=1\n\
                 [2026-03-01T10:00:02.400Z INFO  primary] Committed B2(y) -> 100 tx\n\
                 [2026-03-01T10:00:09Z INFO  primary] Benchmark ended\n"
                    .to_string(),
            ),
        ]);
        let summary = summarize_logs(&logs);
        assert_eq!(summary.throughput, Some(100.0));
        assert_eq!(summary.latencies_ms, vec![400.0]);
        assert!(summary.is_valid());
    }

    fn valid_run(tps_tx: u64, latencies: &[f64]) -> RunSummary {
        RunSummary {
            blocks: 2,
            transactions: tps_tx,
            window_secs: 1.0,
            throughput: Some(tps_tx as f64),
            latencies_ms: latencies.to_vec(),
            ..RunSummary::default()
        }
    }

    #[test]
    fn test_aggregate_averages_valid_runs() {
        let config = BenchConfig {
            runs: 3,
            ..BenchConfig::default()
        };
        let bad = RunSummary {
            truncated_logs: vec!["primary-2".into()],
            ..valid_run(1_000_000, &[1.0])
        };
        let summaries = vec![
            valid_run(1000, &[10.0, 30.0]),
            bad,
            valid_run(3000, &[20.0]),
        ];
        let result = aggregate_runs(&config, &summaries, 1).unwrap();
        assert_eq!(result.throughput, 2000.0);
        assert_eq!(result.throughput_stddev, 1000.0);
        assert_eq!(result.throughput_bps, 2000.0 * 512.0);
        assert_eq!(result.runs_included, 2);
        assert_eq!(result.runs_discarded, 2);
        assert_eq!(result.sample_count, 3);
        let latency = result.latency.unwrap();
        assert_eq!(latency.p50_ms, 20.0);
        assert_eq!(latency.max_ms, 30.0);
    }

    #[test]
    fn test_aggregate_without_samples_has_no_latency() {
        let result = aggregate_runs(&BenchConfig::default(), &[valid_run(10, &[])], 0).unwrap();
        assert_eq!(result.latency, None);
        assert_eq!(result.sample_count, 0);
    }

    #[test]
    fn test_all_runs_truncated_is_an_error() {
        let config = BenchConfig {
            runs: 2,
            ..BenchConfig::default()
        };
        let truncated = RunSummary {
            truncated_logs: vec!["worker-0-0".into()],
            ..valid_run(500, &[5.0])
        };
        assert_eq!(
            aggregate_runs(&config, &[truncated.clone(), truncated], 0),
            Err(AggregationError::AllRunsDiscarded { discarded: 2 })
        );
        assert_eq!(
            aggregate_runs(&config, &[], 0),
            Err(AggregationError::NoRuns)
        );
        let err: OrchestrationError = AggregationError::NoRuns.into();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_pooled_percentiles_ignore_order() {
        let latencies: Vec<f64> = (0..500).map(|i| f64::from(i % 97) * 1.5 + 3.0).collect();
        let runs = vec![
            valid_run(100, &latencies[..200]),
            valid_run(100, &latencies[200..]),
        ];
        let expected = aggregate_runs(&BenchConfig::default(), &runs, 0)
            .unwrap()
            .latency;

        let mut rng = StdRng::seed_from_u64(3);
        let mut shuffled = latencies.clone();
        shuffled.shuffle(&mut rng);
        let runs = vec![
            valid_run(100, &shuffled[..321]),
            valid_run(100, &shuffled[321..]),
        ];
        let latency = aggregate_runs(&BenchConfig::default(), &runs, 0)
            .unwrap()
            .latency;
        assert_eq!(
            latency.map(|l| (l.p50_ms, l.p95_ms, l.p99_ms)),
            expected.map(|l| (l.p50_ms, l.p95_ms, l.p99_ms))
        );
    }
}

//! Result store
//!
//! Layout under the results root:
//!
//! ```text
//! results/
//!   sweep.json                       ordered outcome of the last sweep
//!   summary.csv                      written by CsvReport
//!   bench-0-4-1-c-50000-512-20/
//!     staging/                       parameter, committee and key files
//!     run-1/run.json                 attempt record
//!     run-1/primary-0.log ...        downloaded logs
//!     aggregate.json
//!     summary.txt
//! ```

use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use bench_common::{BenchConfig, NodeConfig};
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    orchestrator::SweepManifest,
    types::{AggregatedResult, BenchmarkResult, RunOutcome, RunResult, SweepEntry},
    utils::{format_count, load_json_results, save_json_results},
};

const SWEEP_FILE: &str = "sweep.json";

/// Consumer of aggregated results, e.g. a plotting backend
pub trait ReportRenderer {
    /// `entries` holds successful results only, in sweep order
    fn render(&self, entries: &[(BenchConfig, AggregatedResult)]) -> BenchmarkResult<()>;
}

/// What `run.json` records about an attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub config: BenchConfig,
    pub run: u32,
    pub attempt: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub outcome: RunOutcome,
    /// Processes whose logs were collected
    pub logs: Vec<String>,
}

impl From<&RunResult> for RunRecord {
    fn from(run: &RunResult) -> Self {
        Self {
            config: run.config,
            run: run.run,
            attempt: run.attempt,
            start_time: run.start_time,
            end_time: run.end_time,
            outcome: run.outcome.clone(),
            logs: run.logs.keys().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResultStore {
    root: PathBuf,
}

impl ResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn config_dir(&self, config: &BenchConfig) -> PathBuf {
        self.root.join(config.key())
    }

    #[must_use]
    pub fn run_dir(&self, config: &BenchConfig, run: u32) -> PathBuf {
        self.config_dir(config).join(format!("run-{run}"))
    }

    /// Create the staging directory of a configuration
    pub fn staging_dir(&self, config: &BenchConfig) -> std::io::Result<PathBuf> {
        let dir = self.config_dir(config).join("staging");
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Create a run directory, dropping logs of an earlier attempt
    pub fn create_run_dir(&self, config: &BenchConfig, run: u32) -> std::io::Result<PathBuf> {
        let dir = self.run_dir(config, run);
        fs::create_dir_all(&dir)?;
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "log") {
                fs::remove_file(path)?;
            }
        }
        Ok(dir)
    }

    pub fn save_run(&self, run: &RunResult) -> BenchmarkResult<()> {
        let dir = self.run_dir(&run.config, run.run);
        fs::create_dir_all(&dir)?;
        save_json_results(&RunRecord::from(run), dir.join("run.json"))
    }

    /// Write `aggregate.json` and append to `summary.txt`
    pub fn save_aggregate(&self, result: &AggregatedResult) -> BenchmarkResult<()> {
        let dir = self.config_dir(&result.config);
        fs::create_dir_all(&dir)?;
        save_json_results(result, dir.join("aggregate.json"))?;

        let mut summary = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("summary.txt"))?;
        summary.write_all(summary_text(result, Utc::now()).as_bytes())?;
        Ok(())
    }

    pub fn save_sweep(&self, node: &NodeConfig, entries: &[SweepEntry]) -> BenchmarkResult<()> {
        fs::create_dir_all(&self.root)?;
        let manifest = SweepManifest {
            node: *node,
            entries: entries.to_vec(),
        };
        save_json_results(&manifest, self.root.join(SWEEP_FILE))?;
        info!("Sweep manifest saved to {}", self.root.join(SWEEP_FILE).display());
        Ok(())
    }

    pub fn load_sweep(&self) -> BenchmarkResult<SweepManifest> {
        load_json_results(self.root.join(SWEEP_FILE))
    }

    /// Read every `*.log` of `dir`, keyed by file stem
    pub fn load_logs(dir: &Path) -> BenchmarkResult<BTreeMap<String, String>> {
        let mut logs = BTreeMap::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("log") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let bytes = fs::read(&path)?;
            logs.insert(name.to_string(), String::from_utf8_lossy(&bytes).into_owned());
        }
        Ok(logs)
    }

    /// Hand the successful results to a renderer, in sweep order
    pub fn render_with(
        &self,
        renderer: &dyn ReportRenderer,
        entries: &[SweepEntry],
    ) -> BenchmarkResult<()> {
        let results: Vec<(BenchConfig, AggregatedResult)> = entries
            .iter()
            .filter_map(|e| e.result.as_ref().ok().map(|r| (e.config, r.clone())))
            .collect();
        renderer.render(&results)
    }
}

/// Human-readable block appended to `summary.txt`
#[must_use]
pub fn summary_text(result: &AggregatedResult, at: DateTime<Utc>) -> String {
    let c = &result.config;
    let mut text = format!(
        "\n-----------------------------------------\n \
         SUMMARY ({})\n\
         -----------------------------------------\n \
         + CONFIG:\n \
         Faults: {} node(s)\n \
         Committee size: {} node(s)\n \
         Worker(s) per node: {} worker(s)\n \
         Collocate primary and workers: {}\n \
         Input rate: {} tx/s\n \
         Transaction size: {} B\n \
         Execution time: {} s\n \
         Runs: {} included, {} discarded\n\n \
         + RESULTS:\n \
         Throughput: {} tx/s (stddev {:.0})\n \
         Throughput: {} B/s\n",
        at.to_rfc3339(),
        c.faults,
        c.nodes,
        c.workers,
        c.collocate,
        format_count(c.rate as f64),
        c.tx_size,
        c.duration,
        result.runs_included,
        result.runs_discarded,
        format_count(result.throughput),
        result.throughput_stddev,
        format_count(result.throughput_bps),
    );
    match &result.latency {
        Some(l) => text.push_str(&format!(
            " Latency: mean {:.0} ms, p50 {:.0} ms, p95 {:.0} ms, p99 {:.0} ms, \
             max {:.0} ms ({} samples)\n",
            l.mean_ms, l.p50_ms, l.p95_ms, l.p99_ms, l.max_ms, result.sample_count
        )),
        None => text.push_str(" Latency: no samples\n"),
    }
    text.push_str(&format!(
        " Samples dropped/skewed: {}/{}\n-----------------------------------------\n",
        result.dropped_samples, result.skewed_samples
    ));
    text
}

/// Writes one CSV row per successful configuration
pub struct CsvReport {
    path: PathBuf,
}

impl CsvReport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ReportRenderer for CsvReport {
    fn render(&self, entries: &[(BenchConfig, AggregatedResult)]) -> BenchmarkResult<()> {
        let mut csv = String::from(
            "faults,nodes,workers,collocate,rate,tx_size,duration,\
             runs_included,runs_discarded,throughput,throughput_stddev,throughput_bps,\
             mean_ms,p50_ms,p95_ms,p99_ms,max_ms,samples\n",
        );
        for (c, r) in entries {
            let latency = r.latency.map_or_else(
                || ",,,,".to_string(),
                |l| {
                    format!(
                        "{:.3},{:.3},{:.3},{:.3},{:.3}",
                        l.mean_ms, l.p50_ms, l.p95_ms, l.p99_ms, l.max_ms
                    )
                },
            );
            csv.push_str(&format!(
                "{},{},{},{},{},{},{},{},{},{:.3},{:.3},{:.3},{},{}\n",
                c.faults,
                c.nodes,
                c.workers,
                c.collocate,
                c.rate,
                c.tx_size,
                c.duration,
                r.runs_included,
                r.runs_discarded,
                r.throughput,
                r.throughput_stddev,
                r.throughput_bps,
                latency,
                r.sample_count
            ));
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, csv)?;
        info!("Report written to {}", self.path.display());
        Ok(())
    }
}

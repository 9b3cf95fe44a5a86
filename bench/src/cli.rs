//! Command-line interface definitions for the benchmark orchestrator

use std::path::PathBuf;

use bench_common::{NodeConfig, OneOrMany, Sweep};
use clap::{Args, Parser, Subcommand};

/// Distributed Protocol Benchmark Orchestrator
///
/// Deploys a committee of nodes, drives load against it, collects the logs and
/// reports throughput and latency, for one configuration or a whole sweep.
#[derive(Parser, Debug)]
#[command(
    version,
    about = "Benchmark orchestrator - Throughput and latency sweeps for a distributed protocol",
    long_about = "
The benchmark orchestrator runs parameter sweeps against a committee of nodes,
either on this machine or on a fleet of remote hosts reached over SSH.

Every benchmark parameter accepts a comma-separated list; the sweep is the
cross product of all lists, run one configuration at a time. Each
configuration gets a result or a typed failure in the final report.
"
)]
pub struct Cli {
    /// Settings file (JSON format)
    ///
    /// SSH access, repository, fleet inventory, timeouts and retry policy.
    /// Missing files fall back to defaults.
    #[arg(long, global = true, default_value = "settings.json", value_name = "FILE")]
    pub settings: PathBuf,

    /// Directory receiving logs, per-run records and aggregated results
    #[arg(long, global = true, default_value = "results", value_name = "DIR")]
    pub results: PathBuf,

    #[command(subcommand)]
    pub command: BenchCommand,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum BenchCommand {
    /// Run a sweep on this machine
    ///
    /// Every process runs locally in its own tmux session; the working
    /// directory must hold the `node` and `benchmark_client` binaries.
    Local(LocalArgs),

    /// Run a sweep on the fleet listed in the settings file
    Remote(RemoteArgs),

    /// Re-run the failed or aborted configurations of the last sweep
    Rerun(RerunArgs),

    /// Install dependencies and build the node on every fleet host
    Install,

    /// Kill every benchmark process on the fleet
    Kill,

    /// Print the fleet inventory and how to connect to each host
    Info,

    /// Download the logs of already-run configurations from their hosts
    ///
    /// Nothing is launched; the processes' log files are fetched into the
    /// run directory and summarized.
    FetchLogs(FetchLogsArgs),

    /// Parse a directory of logs and print the run summary
    Logs(LogsArgs),
}

/// Benchmark parameters; every field takes a comma-separated list
#[derive(Args, Debug, Clone)]
pub struct SweepArgs {
    /// Crashed authorities
    #[arg(long, value_delimiter = ',', default_value = "0", value_name = "COUNT")]
    pub faults: Vec<u32>,

    /// Committee size
    #[arg(long, value_delimiter = ',', default_value = "4", value_name = "COUNT")]
    pub nodes: Vec<u32>,

    /// Workers per authority
    #[arg(long, value_delimiter = ',', default_value = "1", value_name = "COUNT")]
    pub workers: Vec<u32>,

    /// Aggregate input rate across all load generators (tx/s)
    #[arg(long, value_delimiter = ',', default_value = "50000", value_name = "TX/S")]
    pub rate: Vec<u64>,

    /// Transaction size (bytes)
    #[arg(long, value_delimiter = ',', default_value = "512", value_name = "BYTES")]
    pub tx_size: Vec<u64>,

    /// Benchmark duration (seconds)
    #[arg(long, value_delimiter = ',', default_value = "20", value_name = "SECONDS")]
    pub duration: Vec<u64>,

    /// Run primary and workers of an authority on the same host
    #[arg(long, value_delimiter = ',', default_value = "true", value_name = "BOOL")]
    pub collocate: Vec<bool>,

    /// Repetitions averaged into one result
    #[arg(long, value_delimiter = ',', default_value = "1", value_name = "COUNT")]
    pub runs: Vec<u32>,
}

impl SweepArgs {
    #[must_use]
    pub fn to_sweep(&self) -> Sweep {
        Sweep {
            faults: one_or_many(&self.faults),
            nodes: one_or_many(&self.nodes),
            workers: one_or_many(&self.workers),
            rate: one_or_many(&self.rate),
            tx_size: one_or_many(&self.tx_size),
            duration: one_or_many(&self.duration),
            collocate: one_or_many(&self.collocate),
            runs: one_or_many(&self.runs),
        }
    }
}

fn one_or_many<T: Copy>(values: &[T]) -> OneOrMany<T> {
    match values {
        [value] => OneOrMany::One(*value),
        values => OneOrMany::Many(values.to_vec()),
    }
}

/// Node parameters written to every node's parameter file
#[derive(Args, Debug, Clone)]
pub struct NodeArgs {
    /// Header size (bytes)
    #[arg(long, default_value = "1000", value_name = "BYTES")]
    pub header_size: u64,

    /// Maximum delay before sealing a header (ms)
    #[arg(long, default_value = "200", value_name = "MS")]
    pub max_header_delay: u64,

    /// Garbage collection depth (rounds)
    #[arg(long, default_value = "50", value_name = "ROUNDS")]
    pub gc_depth: u64,

    /// Delay before re-requesting missing data (ms)
    #[arg(long, default_value = "10000", value_name = "MS")]
    pub sync_retry_delay: u64,

    /// Nodes asked when re-requesting missing data
    #[arg(long, default_value = "3", value_name = "COUNT")]
    pub sync_retry_nodes: u64,

    /// Batch size (bytes)
    #[arg(long, default_value = "500000", value_name = "BYTES")]
    pub batch_size: u64,

    /// Maximum delay before sealing a batch (ms)
    #[arg(long, default_value = "200", value_name = "MS")]
    pub max_batch_delay: u64,
}

impl NodeArgs {
    #[must_use]
    pub fn to_node_config(&self) -> NodeConfig {
        NodeConfig {
            header_size: self.header_size,
            max_header_delay: self.max_header_delay,
            gc_depth: self.gc_depth,
            sync_retry_delay: self.sync_retry_delay,
            sync_retry_nodes: self.sync_retry_nodes,
            batch_size: self.batch_size,
            max_batch_delay: self.max_batch_delay,
        }
    }
}

/// Arguments for local benchmarks
#[derive(Args, Debug)]
pub struct LocalArgs {
    #[command(flatten)]
    pub sweep: SweepArgs,

    #[command(flatten)]
    pub node: NodeArgs,

    /// Directory holding the node binaries; processes run from here
    #[arg(long, default_value = ".", value_name = "DIR")]
    pub workdir: PathBuf,

    /// Build the binaries (`cargo build --release`) in the working directory first
    #[arg(long)]
    pub build: bool,

    /// Run nodes with debug verbosity
    #[arg(long)]
    pub debug: bool,
}

/// Arguments for fleet benchmarks
#[derive(Args, Debug)]
pub struct RemoteArgs {
    #[command(flatten)]
    pub sweep: SweepArgs,

    #[command(flatten)]
    pub node: NodeArgs,

    /// Read the sweep from a JSON file instead of the parameter flags
    #[arg(long, value_name = "FILE")]
    pub sweep_file: Option<PathBuf>,

    /// Directory holding a local `node` binary, used to generate keys
    #[arg(long, default_value = ".", value_name = "DIR")]
    pub keygen_dir: PathBuf,

    /// Benchmark the binaries already built on the hosts instead of pulling
    /// and rebuilding the repository first
    #[arg(long)]
    pub skip_update: bool,

    /// Run nodes with debug verbosity
    #[arg(long)]
    pub debug: bool,
}

/// Arguments for re-running a sweep
#[derive(Args, Debug)]
pub struct RerunArgs {
    /// Re-run on this machine instead of the fleet
    #[arg(long)]
    pub local: bool,

    /// Directory holding the node binaries (local) or the key generator (remote)
    #[arg(long, default_value = ".", value_name = "DIR")]
    pub workdir: PathBuf,

    /// Run nodes with debug verbosity
    #[arg(long)]
    pub debug: bool,
}

/// Arguments for fetching logs
#[derive(Args, Debug)]
pub struct FetchLogsArgs {
    #[command(flatten)]
    pub sweep: SweepArgs,

    /// Run number the logs are stored under
    #[arg(long, default_value = "1", value_name = "RUN")]
    pub run: u32,

    /// Fetch from this machine instead of the fleet
    #[arg(long)]
    pub local: bool,

    /// Directory holding the node binaries (local runs)
    #[arg(long, default_value = ".", value_name = "DIR")]
    pub workdir: PathBuf,
}

/// Arguments for log parsing
#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Directory containing `*.log` files of one run
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,

    /// Transaction size used to report bytes per second
    #[arg(long, default_value = "512", value_name = "BYTES")]
    pub tx_size: u64,
}

#[cfg(test)]
mod tests {
    use bench_common::BenchConfig;

    use super::*;

    #[test]
    fn test_defaults_match_single_config() {
        let cli = Cli::try_parse_from(["bench", "local"]).unwrap();
        let BenchCommand::Local(args) = cli.command else {
            panic!("expected local");
        };
        assert_eq!(
            args.sweep.to_sweep().expand().unwrap(),
            vec![BenchConfig::default()]
        );
        assert_eq!(args.node.to_node_config(), NodeConfig::default());
        assert_eq!(cli.settings, PathBuf::from("settings.json"));
    }

    #[test]
    fn test_comma_separated_sweep() {
        let cli = Cli::try_parse_from([
            "bench",
            "--results",
            "out",
            "remote",
            "--nodes",
            "10,20,50",
            "--rate",
            "50000,100000",
            "--collocate",
            "true,false",
        ])
        .unwrap();
        let BenchCommand::Remote(args) = cli.command else {
            panic!("expected remote");
        };
        let sweep = args.sweep.to_sweep();
        assert_eq!(sweep.nodes, OneOrMany::Many(vec![10, 20, 50]));
        assert_eq!(sweep.faults, OneOrMany::One(0));
        assert_eq!(sweep.len(), 12);
        assert_eq!(cli.results, PathBuf::from("out"));
    }

    #[test]
    fn test_logs_requires_directory() {
        assert!(Cli::try_parse_from(["bench", "logs"]).is_err());
        let cli = Cli::try_parse_from(["bench", "logs", "results/run-1"]).unwrap();
        assert!(matches!(
            cli.command,
            BenchCommand::Logs(ref a) if a.dir == PathBuf::from("results/run-1")
        ));
    }

    #[test]
    fn test_fetch_logs_and_update_flags() {
        let cli = Cli::try_parse_from(["bench", "fetch-logs", "--nodes", "4,10", "--run", "2"])
            .unwrap();
        let BenchCommand::FetchLogs(args) = cli.command else {
            panic!("expected fetch-logs");
        };
        assert_eq!(args.run, 2);
        assert!(!args.local);
        assert_eq!(args.sweep.to_sweep().len(), 2);

        let cli = Cli::try_parse_from(["bench", "remote"]).unwrap();
        assert!(matches!(cli.command, BenchCommand::Remote(ref a) if !a.skip_update));
        let cli = Cli::try_parse_from(["bench", "remote", "--skip-update"]).unwrap();
        assert!(matches!(cli.command, BenchCommand::Remote(ref a) if a.skip_update));
    }
}

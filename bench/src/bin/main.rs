//! Benchmark Orchestrator
//!
//! Runs throughput and latency sweeps against a committee of nodes, locally
//! or on a fleet of hosts reached over SSH.
//!
//! ## Usage
//!
//! ### Local sweep
//! ```bash
//! cargo run --bin bench -- local --workdir ../narwhal/benchmark --nodes 4 --rate 50000,100000
//! ```
//!
//! ### Fleet sweep
//! ```bash
//! cargo run --bin bench -- --settings settings.json remote --nodes 10,20 --runs 2
//! ```
//!
//! ### Resume after a failure or an interrupt
//! ```bash
//! cargo run --bin bench -- rerun
//! ```

use bench::{
    cli::{BenchCommand, Cli},
    init_logging,
    settings::Settings,
    tasks,
    types::{BenchmarkError, BenchmarkResult},
};
use clap::Parser;
use log::{error, info};

#[tokio::main]
async fn main() -> BenchmarkResult<()> {
    init_logging()?;

    let cli = Cli::parse();

    let result = match Settings::load_or_default(&cli.settings) {
        Ok(settings) => match cli.command {
            BenchCommand::Local(args) => {
                info!("Executing local benchmark");
                tasks::local(&settings, &cli.results, &args).await
            }
            BenchCommand::Remote(args) => {
                info!("Executing remote benchmark");
                tasks::remote(&settings, &cli.results, &args).await
            }
            BenchCommand::Rerun(args) => tasks::rerun(&settings, &cli.results, &args).await,
            BenchCommand::Install => tasks::install(&settings).await,
            BenchCommand::Kill => tasks::kill(&settings).await,
            BenchCommand::Info => {
                tasks::info(&settings);
                Ok(())
            }
            BenchCommand::FetchLogs(args) => {
                tasks::fetch_logs(&settings, &cli.results, &args).await
            }
            BenchCommand::Logs(args) => tasks::logs(&args),
        },
        Err(e) => Err(BenchmarkError::General(e)),
    };

    if let Err(ref e) = result {
        error!("Benchmark failed: {e}");

        match e {
            BenchmarkError::Configuration(_) | BenchmarkError::Config(_) => {
                error!("Please check the benchmark parameters and the settings file");
            }
            BenchmarkError::General(_) => {
                error!("Please check that {} is valid JSON", cli.settings.display());
            }
            BenchmarkError::Remote(_) => {
                error!("Please ensure the hosts are reachable with the configured SSH key");
            }
            BenchmarkError::Initialization(_) => {
                error!("Please ensure ssh, scp and tmux are installed");
            }
            BenchmarkError::Interrupted { .. } => {
                error!("Run `bench rerun` to finish the sweep");
            }
            _ => {}
        }

        std::process::exit(1);
    }

    Ok(())
}

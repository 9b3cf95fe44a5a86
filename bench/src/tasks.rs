//! Handlers behind each CLI command
//!
//! Each handler wires settings into a transport, an inventory and a key
//! generator, runs the orchestrator and persists what it produced.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use bench_common::{BenchConfig, NodeConfig, Sweep};
use log::{error, info, warn};

use crate::{
    cli::{FetchLogsArgs, LocalArgs, LogsArgs, RemoteArgs, RerunArgs},
    commands::CommandMaker,
    committee::NodeBinaryKeyGenerator,
    instance::{Host, HostInventory, StaticInventory},
    metrics::summarize_logs,
    orchestrator::{Orchestrator, Shutdown},
    remote::{HostResults, LocalTransport, RemoteExecutor, SshTransport},
    settings::Settings,
    store::{CsvReport, ResultStore},
    types::{BenchmarkError, BenchmarkResult, OrchestrationError, SweepEntry},
    utils::{format_count, load_json_results},
};

const REPORT_FILE: &str = "summary.csv";

/// Run a sweep with every process on this machine
pub async fn local(settings: &Settings, results: &Path, args: &LocalArgs) -> BenchmarkResult<()> {
    let configs = args.sweep.to_sweep().expand()?;
    let node = args.node.to_node_config();
    let executor = local_executor(settings, &args.workdir);

    if args.build {
        info!("Building binaries in {}", args.workdir.display());
        let command = format!(
            "{} && {}",
            CommandMaker::compile(),
            CommandMaker::alias_binaries("target/release")
        );
        let results = executor
            .run_each_checked(&[(Host::from("127.0.0.1"), command)])
            .await;
        check(results, "build")?;
    }

    let orchestrator = local_orchestrator(settings, results, executor, &args.workdir, &configs)
        .with_debug(args.debug);
    let entries = orchestrator.run_configs(&configs, &node).await?;
    report(orchestrator.store(), &node, &entries)
}

/// Run a sweep on the fleet of the settings file
pub async fn remote(settings: &Settings, results: &Path, args: &RemoteArgs) -> BenchmarkResult<()> {
    let sweep: Sweep = match &args.sweep_file {
        Some(path) => load_json_results(path)?,
        None => args.sweep.to_sweep(),
    };
    let configs = sweep.expand()?;
    let node = args.node.to_node_config();

    let mut orchestrator =
        remote_orchestrator(settings, results, &args.keygen_dir)?.with_debug(args.debug);
    if !args.skip_update {
        orchestrator = orchestrator.with_update(settings.repository.clone());
    }
    let entries = orchestrator.run_configs(&configs, &node).await?;
    report(orchestrator.store(), &node, &entries)
}

/// Run again every configuration of the last sweep that has no result
pub async fn rerun(settings: &Settings, results: &Path, args: &RerunArgs) -> BenchmarkResult<()> {
    let store = ResultStore::new(results);
    let mut manifest = store.load_sweep()?;
    let pending = manifest.pending();
    if pending.is_empty() {
        info!("Every configuration of the last sweep has a result");
        return Ok(());
    }
    info!("Re-running {} configuration(s)", pending.len());

    let orchestrator = if args.local {
        let executor = local_executor(settings, &args.workdir);
        local_orchestrator(settings, results, executor, &args.workdir, &pending)
    } else {
        remote_orchestrator(settings, results, &args.workdir)?
    }
    .with_debug(args.debug);

    let fresh = orchestrator.run_configs(&pending, &manifest.node).await?;
    manifest.merge(fresh);
    report(&store, &manifest.node, &manifest.entries)
}

/// Download and summarize the logs of configurations that already ran
pub async fn fetch_logs(
    settings: &Settings,
    results: &Path,
    args: &FetchLogsArgs,
) -> BenchmarkResult<()> {
    let configs = args.sweep.to_sweep().expand()?;
    let orchestrator = if args.local {
        let executor = local_executor(settings, &args.workdir);
        local_orchestrator(settings, results, executor, &args.workdir, &configs)
    } else {
        remote_orchestrator(settings, results, &args.workdir)?
    };

    let mut failed = 0;
    for config in &configs {
        match orchestrator.fetch_logs(config, args.run).await {
            Ok(logs) => {
                let summary = summarize_logs(&logs);
                println!("\n {} run {} ({} log(s))", config.key(), args.run, logs.len());
                print!("{summary}");
                if let Some(tps) = summary.throughput {
                    println!(" Throughput: {} B/s", format_count(tps * config.tx_size as f64));
                }
            }
            Err(e) => {
                error!("{}: {e}", config.key());
                failed += 1;
            }
        }
    }
    if failed > 0 {
        return Err(BenchmarkError::Internal(format!(
            "logs of {failed} configuration(s) could not be fetched"
        )));
    }
    Ok(())
}

/// Install the toolchain and build the node on every fleet host
pub async fn install(settings: &Settings) -> BenchmarkResult<()> {
    let hosts = fleet_hosts(settings)?;
    let executor = ssh_executor(settings)?;
    let command = format!(
        "{} && {}",
        CommandMaker::install(&settings.repository),
        CommandMaker::update(&settings.repository)
    );
    info!("Installing {} on {} host(s)", settings.repository.name, hosts.len());
    let results = executor
        .run_each_checked(&hosts.iter().map(|h| (h.clone(), command.clone())).collect::<Vec<_>>())
        .await;
    check(results, "install")?;
    info!("Installed on every host");
    Ok(())
}

/// Kill every benchmark process on the fleet
pub async fn kill(settings: &Settings) -> BenchmarkResult<()> {
    let hosts = fleet_hosts(settings)?;
    let executor = ssh_executor(settings)?;
    check(executor.kill_all(&hosts).await, "kill")?;
    info!("Killed benchmark processes on {} host(s)", hosts.len());
    Ok(())
}

/// Print the fleet and how to reach each host
pub fn info(settings: &Settings) {
    let inventory = settings.inventory();
    let key = expand_home(&settings.ssh.key_path);
    println!("\n----------------------------------------------------------------");
    println!(" INFO:");
    println!("----------------------------------------------------------------");
    if inventory.is_empty() {
        println!(" No hosts configured");
    }
    for (region, hosts) in inventory.regions() {
        println!(" {region}:");
        for (i, host) in hosts.iter().enumerate() {
            println!(
                "  {i}\tssh -i {} {}@{host}",
                key.display(),
                settings.ssh.user
            );
        }
    }
    println!("----------------------------------------------------------------\n");
}

/// Summarize the logs of one run directory
pub fn logs(args: &LogsArgs) -> BenchmarkResult<()> {
    let logs = ResultStore::load_logs(&args.dir)?;
    if logs.is_empty() {
        return Err(BenchmarkError::Configuration(format!(
            "no *.log file in {}",
            args.dir.display()
        )));
    }
    let summary = summarize_logs(&logs);
    println!("\n {} log(s) in {}", logs.len(), args.dir.display());
    print!("{summary}");
    if let Some(tps) = summary.throughput {
        println!(" Throughput: {} B/s", format_count(tps * args.tx_size as f64));
    }
    Ok(())
}

/// Persist the sweep, render the CSV report and print one line per
/// configuration
fn report(store: &ResultStore, node: &NodeConfig, entries: &[SweepEntry]) -> BenchmarkResult<()> {
    store.save_sweep(node, entries)?;
    store.render_with(&CsvReport::new(store.root().join(REPORT_FILE)), entries)?;

    println!("\n-----------------------------------------");
    println!(" SWEEP ({} configuration(s))", entries.len());
    println!("-----------------------------------------");
    for entry in entries {
        println!("{}", report_line(entry));
    }
    println!("-----------------------------------------\n");

    let pending = entries
        .iter()
        .filter(|e| matches!(e.result, Err(OrchestrationError::Aborted)))
        .count();
    if pending > 0 {
        return Err(BenchmarkError::Interrupted { pending });
    }
    Ok(())
}

fn report_line(entry: &SweepEntry) -> String {
    let key = entry.config.key();
    match &entry.result {
        Ok(r) => {
            let latency = r.latency.map_or_else(
                || "no latency samples".to_string(),
                |l| format!("p50 {:.0} ms, p99 {:.0} ms", l.p50_ms, l.p99_ms),
            );
            format!(
                " {key}: {} tx/s, {} B/s, {latency} ({}/{} runs)",
                format_count(r.throughput),
                format_count(r.throughput_bps),
                r.runs_included,
                r.runs_included + r.runs_discarded
            )
        }
        Err(e) => format!(" {key}: FAILED ({e})"),
    }
}

fn local_executor(settings: &Settings, workdir: &Path) -> RemoteExecutor {
    RemoteExecutor::new(Arc::new(LocalTransport::new(workdir)), settings.timeouts)
}

fn local_orchestrator(
    settings: &Settings,
    results: &Path,
    executor: RemoteExecutor,
    workdir: &Path,
    configs: &[BenchConfig],
) -> Orchestrator {
    let slots = configs
        .iter()
        .map(BenchConfig::hosts_required)
        .max()
        .unwrap_or(0);
    let provider = StaticInventory::new(HostInventory::localhost(slots));
    Orchestrator::new(
        executor,
        Arc::new(provider),
        Arc::new(NodeBinaryKeyGenerator::new(workdir)),
        ResultStore::new(results),
    )
    .with_policy(settings.policy)
    .with_base_port(settings.base_port)
    .with_shutdown(Shutdown::on_ctrl_c())
}

fn remote_orchestrator(
    settings: &Settings,
    results: &Path,
    keygen_dir: &Path,
) -> BenchmarkResult<Orchestrator> {
    fleet_hosts(settings)?;
    Ok(Orchestrator::new(
        ssh_executor(settings)?,
        Arc::new(StaticInventory::new(settings.inventory())),
        Arc::new(NodeBinaryKeyGenerator::new(keygen_dir)),
        ResultStore::new(results),
    )
    .with_policy(settings.policy)
    .with_base_port(settings.base_port)
    .with_workdir(settings.repository.name.clone())
    .with_shutdown(Shutdown::on_ctrl_c()))
}

fn ssh_executor(settings: &Settings) -> BenchmarkResult<RemoteExecutor> {
    let transport = SshTransport::new(
        &settings.ssh.user,
        &expand_home(&settings.ssh.key_path),
        settings.ssh.connect_timeout_secs,
    )?;
    Ok(RemoteExecutor::new(Arc::new(transport), settings.timeouts))
}

fn fleet_hosts(settings: &Settings) -> BenchmarkResult<Vec<Host>> {
    let hosts = settings.inventory().hosts();
    if hosts.is_empty() {
        return Err(BenchmarkError::Configuration(
            "no hosts listed in the settings file".into(),
        ));
    }
    Ok(hosts)
}

/// Log every failed host and return the first failure
fn check<T>(results: HostResults<T>, operation: &str) -> BenchmarkResult<()> {
    let mut first = None;
    for (host, result) in results.into_inner() {
        if let Err(e) = result {
            error!("[{host}] {operation}: {e}");
            first.get_or_insert(e);
        }
    }
    match first {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// Resolve a leading `~/` against `$HOME`
fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        (Ok(_), None) => {
            warn!("HOME is not set; using {} as is", path.display());
            path.to_path_buf()
        }
        (Err(_), _) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::{
        remote::RemoteError,
        types::{AggregatedResult, LatencyStats},
    };

    fn aggregate(config: BenchConfig) -> AggregatedResult {
        AggregatedResult {
            config,
            throughput: 48_250.0,
            throughput_stddev: 0.0,
            throughput_bps: 24_704_000.0,
            latency: Some(LatencyStats {
                mean_ms: 510.0,
                p50_ms: 500.0,
                p95_ms: 700.0,
                p99_ms: 900.0,
                max_ms: 950.0,
            }),
            sample_count: 40,
            dropped_samples: 0,
            skewed_samples: 0,
            runs_included: 2,
            runs_discarded: 1,
        }
    }

    #[test]
    fn test_report_line() {
        let config = BenchConfig::default();
        let ok = SweepEntry {
            config,
            result: Ok(aggregate(config)),
        };
        let line = report_line(&ok);
        assert!(line.contains("48,250 tx/s"));
        assert!(line.contains("p50 500 ms"));
        assert!(line.contains("(2/3 runs)"));

        let failed = SweepEntry {
            config,
            result: Err(OrchestrationError::InvalidConfig {
                reason: "faults must be below nodes".into(),
            }),
        };
        assert!(report_line(&failed).contains("FAILED"));
    }

    #[test]
    fn test_report_persists_sweep_and_csv() {
        let dir = tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        let config = BenchConfig::default();
        let entries = vec![
            SweepEntry {
                config,
                result: Ok(aggregate(config)),
            },
            SweepEntry {
                config: BenchConfig { nodes: 10, ..config },
                result: Err(OrchestrationError::InvalidConfig {
                    reason: "not enough hosts".into(),
                }),
            },
        ];

        report(&store, &NodeConfig::default(), &entries).unwrap();

        assert_eq!(store.load_sweep().unwrap().entries, entries);
        let csv = std::fs::read_to_string(dir.path().join(REPORT_FILE)).unwrap();
        assert_eq!(csv.lines().count(), 2);
    }

    #[test]
    fn test_report_flags_interrupted_sweep() {
        let dir = tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        let entries = vec![SweepEntry {
            config: BenchConfig::default(),
            result: Err(OrchestrationError::Aborted),
        }];

        let err = report(&store, &NodeConfig::default(), &entries).unwrap_err();

        assert!(matches!(err, BenchmarkError::Interrupted { pending: 1 }));
        assert_eq!(store.load_sweep().unwrap().pending().len(), 1);
    }

    #[test]
    fn test_check_returns_first_failure() {
        let failure = RemoteError::Io {
            host: "10.0.0.2".into(),
            reason: "connection reset".into(),
        };
        let results = HostResults {
            results: vec![
                (Host::from("10.0.0.1"), Ok(())),
                (Host::from("10.0.0.2"), Err(failure.clone())),
            ],
        };
        let err = check(results, "kill").unwrap_err();
        assert!(matches!(err, BenchmarkError::Remote(e) if e == failure));
    }

    #[test]
    fn test_expand_home() {
        let plain = Path::new("/etc/key.pem");
        assert_eq!(expand_home(plain), plain);
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(
                expand_home(Path::new("~/.ssh/aws")),
                PathBuf::from(home).join(".ssh/aws")
            );
        }
    }

    #[test]
    fn test_logs_rejects_empty_directory() {
        let dir = tempdir().unwrap();
        let args = LogsArgs {
            dir: dir.path().to_path_buf(),
            tx_size: 512,
        };
        assert!(matches!(logs(&args), Err(BenchmarkError::Configuration(_))));
    }
}

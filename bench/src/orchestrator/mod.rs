//! Benchmark orchestrator
//!
//! Drives every configuration of a sweep through deployment, launch,
//! monitored execution, log collection and cleanup, one configuration at a
//! time. Within an attempt all per-host operations of a stage run
//! concurrently and the stage ends when every host has answered or timed
//! out.
//!
//! A failure is always attached to the configuration it happened in; the
//! sweep moves on to the next configuration whatever the outcome.

mod attempt;
mod plan;

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use bench_common::{BenchConfig, NodeConfig, Sweep};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

pub use attempt::Stage;
pub use plan::{DeploymentPlan, Process, Role};

use crate::{
    commands::{CommandMaker, Repository, COMMITTEE_FILE, PARAMETERS_FILE},
    committee::{Committee, KeyGenerator, KeyPair},
    instance::{Host, HostInventory, InstanceProvider},
    metrics::{aggregate_runs, summarize_run, AggregationError, RunSummary},
    remote::{unique_hosts, RemoteExecutor},
    store::ResultStore,
    types::{
        AggregatedResult, BenchmarkError, BenchmarkResult, OrchestrationError, RunOutcome,
        RunResult, SweepEntry,
    },
    utils::save_json_results,
};

/// Retry and monitoring policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// Extra attempts after a transient failure
    pub max_retries: u32,
    /// Added to the benchmark duration before processes are stopped
    pub grace_period_secs: u64,
    /// Interval between liveness polls
    pub poll_interval_secs: u64,
    /// Wait after asking processes to stop, so they can flush their logs
    pub drain_period_secs: u64,
    /// Early exits on more than this fraction of hosts are fatal
    pub fatal_host_fraction: f64,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            grace_period_secs: 10,
            poll_interval_secs: 5,
            drain_period_secs: 5,
            fatal_host_fraction: 0.5,
        }
    }
}

impl Policy {
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_retries + 1
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

/// Operator interrupt, observed between and during stages
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: Option<watch::Receiver<bool>>,
}

impl Shutdown {
    /// A signal together with the sender that triggers it
    #[must_use]
    pub fn new() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx: Some(rx) })
    }

    /// A signal that never fires
    #[must_use]
    pub fn never() -> Self {
        Self { rx: None }
    }

    /// Trigger on Ctrl-C
    #[must_use]
    pub fn on_ctrl_c() -> Self {
        let (tx, shutdown) = Self::new();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cleaning up before exit");
                let _ = tx.send(true);
            }
        });
        shutdown
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once triggered; pending forever otherwise
    pub async fn triggered(&self) {
        if let Some(rx) = &self.rx {
            let mut rx = rx.clone();
            if rx.wait_for(|fired| *fired).await.is_ok() {
                return;
            }
        }
        std::future::pending::<()>().await;
    }

    fn check(&self) -> Result<(), OrchestrationError> {
        if self.is_triggered() {
            Err(OrchestrationError::Aborted)
        } else {
            Ok(())
        }
    }
}

pub struct Orchestrator {
    executor: RemoteExecutor,
    provider: Arc<dyn InstanceProvider>,
    keys: Arc<dyn KeyGenerator>,
    store: ResultStore,
    policy: Policy,
    base_port: u16,
    workdir: String,
    debug: bool,
    update: Option<Repository>,
    shutdown: Shutdown,
}

impl Orchestrator {
    pub fn new(
        executor: RemoteExecutor,
        provider: Arc<dyn InstanceProvider>,
        keys: Arc<dyn KeyGenerator>,
        store: ResultStore,
    ) -> Self {
        Self {
            executor,
            provider,
            keys,
            store,
            policy: Policy::default(),
            base_port: bench_common::constants::DEFAULT_BASE_PORT,
            workdir: ".".into(),
            debug: false,
            update: None,
            shutdown: Shutdown::never(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_base_port(mut self, base_port: u16) -> Self {
        self.base_port = base_port;
        self
    }

    /// Remote working directory (the repository checkout)
    #[must_use]
    pub fn with_workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = workdir.into();
        self
    }

    /// Run nodes with debug verbosity
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Pull and rebuild `repository` on the selected hosts before the first
    /// configuration
    #[must_use]
    pub fn with_update(mut self, repository: Repository) -> Self {
        self.update = Some(repository);
        self
    }

    #[must_use]
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    #[must_use]
    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Expand `sweep` and run every configuration, in expansion order
    pub async fn run_sweep(
        &self,
        sweep: &Sweep,
        node: &NodeConfig,
    ) -> BenchmarkResult<Vec<SweepEntry>> {
        let configs = sweep.expand()?;
        info!("Sweep expands to {} configuration(s)", configs.len());
        self.run_configs(&configs, node).await
    }

    /// Run the given configurations against one inventory snapshot
    pub async fn run_configs(
        &self,
        configs: &[BenchConfig],
        node: &NodeConfig,
    ) -> BenchmarkResult<Vec<SweepEntry>> {
        node.validate()?;
        let inventory = self.provider.describe().await?;
        info!(
            "Fleet: {} host(s) in {} region(s)",
            inventory.len(),
            inventory.regions().len()
        );
        if let Some(repository) = &self.update {
            self.update_hosts(repository, configs, &inventory).await?;
        }

        let mut entries = Vec::with_capacity(configs.len());
        let mut aborted = false;
        for (i, config) in configs.iter().enumerate() {
            if aborted || self.shutdown.is_triggered() {
                if !aborted {
                    aborted = true;
                    self.abort_fleet(&inventory).await;
                }
                entries.push(SweepEntry {
                    config: *config,
                    result: Err(OrchestrationError::Aborted),
                });
                continue;
            }

            info!("Configuration {}/{}: {config}", i + 1, configs.len());
            let result = self.run_config(config, node, &inventory).await;
            match &result {
                Ok(aggregate) => {
                    info!(
                        "{}: {:.0} tx/s over {} run(s)",
                        config.key(),
                        aggregate.throughput,
                        aggregate.runs_included
                    );
                    if let Err(e) = self.store.save_aggregate(aggregate) {
                        warn!("Failed to save aggregate of {}: {e}", config.key());
                    }
                }
                Err(OrchestrationError::Aborted) => {
                    aborted = true;
                    self.abort_fleet(&inventory).await;
                }
                Err(e) => error!("{} failed: {e}", config.key()),
            }
            entries.push(SweepEntry {
                config: *config,
                result,
            });
        }
        Ok(entries)
    }

    /// All runs of one configuration, aggregated
    pub async fn run_config(
        &self,
        config: &BenchConfig,
        node: &NodeConfig,
        inventory: &HostInventory,
    ) -> Result<AggregatedResult, OrchestrationError> {
        config.validate()?;
        let hosts = inventory
            .select(config)
            .ok_or_else(|| OrchestrationError::InvalidConfig {
                reason: format!(
                    "needs {} host(s), the fleet has {}",
                    config.hosts_required(),
                    inventory.len()
                ),
            })?;
        self.shutdown.check()?;

        let plan = self.stage(config, node, hosts).await?;

        let mut summaries: Vec<RunSummary> = Vec::new();
        let mut failed_runs = 0;
        let mut last_error = None;
        for run in 1..=config.runs {
            match self.run_with_retries(&plan, run).await {
                Ok(result) => summaries.push(summarize_run(&result)),
                Err(OrchestrationError::Aborted) => return Err(OrchestrationError::Aborted),
                Err(e) => {
                    warn!("{} run {run} failed: {e}", config.key());
                    failed_runs += 1;
                    last_error = Some(e);
                }
            }
        }

        if summaries.is_empty() {
            return Err(last_error.unwrap_or_else(|| AggregationError::NoRuns.into()));
        }
        Ok(aggregate_runs(config, &summaries, failed_runs)?)
    }

    /// Up to `max_retries + 1` attempts of one run
    async fn run_with_retries(
        &self,
        plan: &DeploymentPlan,
        run: u32,
    ) -> Result<RunResult, OrchestrationError> {
        let attempts = self.policy.attempts();
        let mut last = None;
        for attempt in 1..=attempts {
            let result = self.run_attempt(plan, run, attempt).await;
            if let Err(e) = self.store.save_run(&result) {
                warn!("Failed to save run {run} of {}: {e}", plan.config.key());
            }
            match result.outcome {
                RunOutcome::Success => return Ok(result),
                RunOutcome::PartialFailure(cause) => {
                    warn!(
                        "{} run {run} attempt {attempt}/{attempts} failed: {cause}",
                        plan.config.key()
                    );
                    last = Some(cause);
                }
                RunOutcome::Fatal(cause) => return Err(cause),
            }
        }
        Err(OrchestrationError::RetriesExhausted {
            attempts,
            last: Box::new(last.unwrap_or(OrchestrationError::Aborted)),
        })
    }

    /// Write parameter, key and committee files once per configuration
    async fn stage(
        &self,
        config: &BenchConfig,
        node: &NodeConfig,
        hosts: Vec<Host>,
    ) -> Result<DeploymentPlan, OrchestrationError> {
        let staging_failure = |reason: String| OrchestrationError::DeploymentFailure {
            hosts: Vec::new(),
            reason,
        };

        let staging = self
            .store
            .staging_dir(config)
            .map_err(|e| staging_failure(format!("staging directory: {e}")))?;
        save_json_results(node, staging.join(PARAMETERS_FILE))
            .map_err(|e| staging_failure(format!("parameters: {e}")))?;

        let mut keys: Vec<KeyPair> = Vec::with_capacity(config.nodes as usize);
        for i in 0..config.nodes as usize {
            let path = staging.join(CommandMaker::key_file(i));
            let pair = self
                .keys
                .generate(&path)
                .await
                .map_err(|e| staging_failure(format!("key generation: {e}")))?;
            keys.push(pair);
        }

        let committee = Committee::new(&keys, &hosts, config, self.base_port)?;
        committee
            .save_to_file(staging.join(COMMITTEE_FILE))
            .map_err(|e| staging_failure(format!("committee: {e:#}")))?;

        Ok(DeploymentPlan::new(
            *config,
            hosts,
            &committee,
            staging,
            &self.workdir,
            self.debug,
        ))
    }

    /// Download the logs a configuration left on its hosts into run `run`,
    /// without running anything
    ///
    /// Needs the key files staged by an earlier run of the configuration.
    pub async fn fetch_logs(
        &self,
        config: &BenchConfig,
        run: u32,
    ) -> BenchmarkResult<BTreeMap<String, String>> {
        config.validate()?;
        let inventory = self.provider.describe().await?;
        let hosts = inventory.select(config).ok_or_else(|| {
            BenchmarkError::Configuration(format!(
                "{} needs {} host(s), the fleet has {}",
                config.key(),
                config.hosts_required(),
                inventory.len()
            ))
        })?;

        let staging = self.store.staging_dir(config)?;
        let keys = (0..config.nodes as usize)
            .map(|i| KeyPair::load_from_file(staging.join(CommandMaker::key_file(i))))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let committee = Committee::new(&keys, &hosts, config, self.base_port)
            .map_err(|e| BenchmarkError::Configuration(e.to_string()))?;
        let plan = DeploymentPlan::new(
            *config,
            hosts,
            &committee,
            staging,
            &self.workdir,
            self.debug,
        );

        let run_dir = self.store.create_run_dir(config, run)?;
        let mut logs = BTreeMap::new();
        let (missing, timed_out) = self.collect(&plan, &run_dir, &mut logs).await;
        if let Some(e) = timed_out {
            warn!("{}: {e}", config.key());
        }
        if !missing.is_empty() {
            warn!("{}: {} log(s) unavailable", config.key(), missing.len());
        }
        info!(
            "Fetched {} log(s) of {} into {}",
            logs.len(),
            config.key(),
            run_dir.display()
        );
        Ok(logs)
    }

    /// Update the checkout on every host some configuration will use
    async fn update_hosts(
        &self,
        repository: &Repository,
        configs: &[BenchConfig],
        inventory: &HostInventory,
    ) -> BenchmarkResult<()> {
        let selected: Vec<Host> = configs
            .iter()
            .filter(|c| c.validate().is_ok())
            .filter_map(|c| inventory.select(c))
            .flatten()
            .collect();
        let hosts = unique_hosts(&selected);
        if hosts.is_empty() {
            return Ok(());
        }

        info!("Updating {} on {} host(s)", repository.name, hosts.len());
        let command = CommandMaker::update(repository);
        let commands: Vec<(Host, String)> = hosts
            .into_iter()
            .map(|host| (host, command.clone()))
            .collect();
        let results = self.executor.run_each_checked(&commands).await;
        for (host, e) in results.failures() {
            error!("[{host}] update: {e}");
        }
        let outcome = match results.failures().next() {
            Some((_, e)) => Err(e.clone().into()),
            None => Ok(()),
        };
        outcome
    }

    async fn abort_fleet(&self, inventory: &HostInventory) {
        let hosts = inventory.hosts();
        warn!("Sweep aborted, killing benchmark processes on {} host(s)", hosts.len());
        let results = self.executor.kill_all(&hosts).await;
        for (host, e) in results.failures() {
            warn!("[{host}] cleanup failed: {e}");
        }
    }
}

/// Outcome of a sweep as persisted for `rerun`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepManifest {
    pub node: NodeConfig,
    pub entries: Vec<SweepEntry>,
}

impl SweepManifest {
    /// Configurations without a result, in sweep order
    #[must_use]
    pub fn pending(&self) -> Vec<BenchConfig> {
        self.entries
            .iter()
            .filter(|e| !e.is_success())
            .map(|e| e.config)
            .collect()
    }

    /// Replace entries with fresh outcomes of the same configurations
    pub fn merge(&mut self, fresh: Vec<SweepEntry>) {
        for entry in fresh {
            match self.entries.iter_mut().find(|e| e.config == entry.config) {
                Some(existing) => *existing = entry,
                None => self.entries.push(entry),
            }
        }
    }
}

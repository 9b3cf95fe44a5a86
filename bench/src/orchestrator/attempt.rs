//! One attempt of one run
//!
//! `Pending -> Deploying -> Launching -> Running -> Collecting -> {Done | Failed}`
//!
//! Every path out of an attempt, including aborts and stage failures, goes
//! through a single `killAll` on the attempt's hosts.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    path::Path,
};

use chrono::Utc;
use log::{debug, info, warn};
use tokio::time::{sleep, Instant};

use super::{DeploymentPlan, Orchestrator, Role};
use crate::{
    commands::CommandMaker,
    instance::Host,
    logs::LogParser,
    remote::{HostResults, Transfer},
    types::{OrchestrationError, RunOutcome, RunResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pending,
    Deploying,
    Launching,
    Running,
    Collecting,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Deploying => "deploying",
            Self::Launching => "launching",
            Self::Running => "running",
            Self::Collecting => "collecting",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Logs every stage transition of one attempt
struct Tracker {
    label: String,
    stage: Stage,
}

impl Tracker {
    fn new(label: String) -> Self {
        Self {
            label,
            stage: Stage::Pending,
        }
    }

    fn enter(&mut self, next: Stage) {
        info!("[{}] {} -> {}", self.label, self.stage, next);
        self.stage = next;
    }
}

/// Turn a failed stage into its error; a stage that only timed out reports
/// `TransportTimeout`
fn stage_result<T>(
    results: &HostResults<T>,
    operation: &str,
    failure: impl FnOnce(Vec<Host>, String) -> OrchestrationError,
) -> Result<(), OrchestrationError> {
    if results.is_ok() {
        return Ok(());
    }
    for (host, e) in results.failures() {
        warn!("[{host}] {operation}: {e}");
    }
    let hosts = results.failed_hosts();
    if results.only_timeouts() {
        return Err(OrchestrationError::TransportTimeout {
            hosts,
            operation: operation.to_string(),
        });
    }
    let reason = results
        .failures()
        .next()
        .map(|(_, e)| e.to_string())
        .unwrap_or_default();
    Err(failure(hosts, reason))
}

impl Orchestrator {
    pub(super) async fn run_attempt(
        &self,
        plan: &DeploymentPlan,
        run: u32,
        attempt: u32,
    ) -> RunResult {
        let start_time = Utc::now();
        let label = format!("{} run {run} attempt {attempt}", plan.config.key());
        let mut tracker = Tracker::new(label);
        let mut logs = BTreeMap::new();

        let result = self.drive(plan, run, &mut tracker, &mut logs).await;

        let cleanup = self.executor.kill_all(&plan.hosts).await;
        for (host, e) in cleanup.failures() {
            warn!("[{host}] cleanup: {e}");
        }

        let outcome = match result {
            Ok(()) => {
                tracker.enter(Stage::Done);
                RunOutcome::Success
            }
            Err(cause) => {
                tracker.enter(Stage::Failed);
                RunOutcome::failure(cause)
            }
        };

        RunResult {
            config: plan.config,
            run,
            attempt,
            start_time,
            end_time: Utc::now(),
            logs,
            outcome,
        }
    }

    async fn drive(
        &self,
        plan: &DeploymentPlan,
        run: u32,
        tracker: &mut Tracker,
        logs: &mut BTreeMap<String, String>,
    ) -> Result<(), OrchestrationError> {
        self.shutdown.check()?;
        tracker.enter(Stage::Deploying);
        self.deploy(plan).await?;

        self.shutdown.check()?;
        tracker.enter(Stage::Launching);
        self.launch(plan).await?;

        tracker.enter(Stage::Running);
        let early_exits = self.monitor(plan).await?;
        self.stop(plan).await?;

        tracker.enter(Stage::Collecting);
        let run_dir = self
            .store
            .create_run_dir(&plan.config, run)
            .map_err(|e| OrchestrationError::DeploymentFailure {
                hosts: Vec::new(),
                reason: format!("run directory: {e}"),
            })?;
        let (missing, timed_out) = self.collect(plan, &run_dir, logs).await;

        if let Some(failure) = self.classify_exits(plan, &early_exits) {
            return Err(failure);
        }
        if let Some(timeout) = timed_out {
            return Err(timeout);
        }

        let mut truncated: BTreeSet<String> = missing;
        for (name, text) in logs.iter() {
            if LogParser::new(name.as_str(), text.as_str())
                .events()
                .any(|e| e.is_truncation())
            {
                truncated.insert(name.clone());
            }
        }
        if !truncated.is_empty() {
            return Err(OrchestrationError::LogTruncation {
                logs: truncated.into_iter().collect(),
            });
        }
        Ok(())
    }

    /// Clean the hosts and upload the staged files
    async fn deploy(&self, plan: &DeploymentPlan) -> Result<(), OrchestrationError> {
        let reset = format!("{} ; {}", CommandMaker::cleanup(), CommandMaker::clean_logs());
        let commands: Vec<(Host, String)> = crate::remote::unique_hosts(&plan.hosts)
            .into_iter()
            .map(|host| (host, plan.remote_command(&reset)))
            .collect();
        let results = self.executor.run_each_checked(&commands).await;
        stage_result(&results, "cleanup", |hosts, reason| {
            OrchestrationError::DeploymentFailure { hosts, reason }
        })?;

        let results = self.executor.upload(&plan.uploads()).await;
        stage_result(&results, "upload", |hosts, reason| {
            OrchestrationError::DeploymentFailure { hosts, reason }
        })
    }

    /// Boot primaries, then workers, then load generators
    async fn launch(&self, plan: &DeploymentPlan) -> Result<(), OrchestrationError> {
        for role in [Role::Primary, Role::Worker, Role::Client] {
            self.shutdown.check()?;
            let commands = plan.launch_commands(role);
            debug!("Launching {} {role:?} process(es)", commands.len());
            let results = self.executor.run_each_checked(&commands).await;
            stage_result(&results, "launch", |hosts, reason| {
                OrchestrationError::LaunchFailure { hosts, reason }
            })?;
        }
        Ok(())
    }

    /// Wait out the benchmark, polling liveness; returns the slots whose
    /// processes exited early
    async fn monitor(&self, plan: &DeploymentPlan) -> Result<BTreeSet<usize>, OrchestrationError> {
        let deadline = Instant::now()
            + plan.config.duration()
            + std::time::Duration::from_secs(self.policy.grace_period_secs);
        let commands: Vec<(Host, String)> = plan
            .processes
            .iter()
            .map(|p| (p.host.clone(), CommandMaker::alive(&p.session)))
            .collect();
        let mut exited = BTreeSet::new();

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let step = self.policy.poll_interval().min(deadline - now);
            tokio::select! {
                () = sleep(step) => {}
                () = self.shutdown.triggered() => return Err(OrchestrationError::Aborted),
            }

            let results = self.executor.run_each(&commands).await;
            for ((_, result), process) in results.iter().zip(&plan.processes) {
                match result {
                    Ok(output) if !output.success() => {
                        if exited.insert(process.slot) {
                            warn!("[{}] {} exited early", process.host, process.session);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => debug!("[{}] liveness poll: {e}", process.host),
                }
            }
        }
        Ok(exited)
    }

    /// Ask every process to stop, then give them time to flush
    async fn stop(&self, plan: &DeploymentPlan) -> Result<(), OrchestrationError> {
        let commands: Vec<(Host, String)> = plan
            .processes
            .iter()
            .rev()
            .map(|p| (p.host.clone(), CommandMaker::stop(&p.session)))
            .collect();
        let results = self.executor.run_each(&commands).await;
        for (host, e) in results.failures() {
            debug!("[{host}] stop: {e}");
        }
        tokio::select! {
            () = sleep(std::time::Duration::from_secs(self.policy.drain_period_secs)) => Ok(()),
            () = self.shutdown.triggered() => Err(OrchestrationError::Aborted),
        }
    }

    /// Download every log into `logs`
    ///
    /// Returns the logs that could not be fetched, and a `TransportTimeout`
    /// when every failed download timed out.
    pub(super) async fn collect(
        &self,
        plan: &DeploymentPlan,
        run_dir: &Path,
        logs: &mut BTreeMap<String, String>,
    ) -> (BTreeSet<String>, Option<OrchestrationError>) {
        let transfers: Vec<Transfer> = plan
            .processes
            .iter()
            .map(|p| Transfer {
                host: p.host.clone(),
                local: run_dir.join(format!("{}.log", p.session)),
                remote: plan.remote_path(&CommandMaker::log_file(&p.session)),
            })
            .collect();
        let results = self.executor.download(&transfers).await;
        let timed_out = results
            .only_timeouts()
            .then(|| OrchestrationError::TransportTimeout {
                hosts: results.failed_hosts(),
                operation: "download".into(),
            });

        let mut missing = BTreeSet::new();
        for ((host, result), process) in results.iter().zip(&plan.processes) {
            let fetched = match result {
                Ok(()) => std::fs::read(run_dir.join(format!("{}.log", process.session)))
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match fetched {
                Ok(bytes) => {
                    logs.insert(
                        process.session.clone(),
                        String::from_utf8_lossy(&bytes).into_owned(),
                    );
                }
                Err(e) => {
                    warn!("[{host}] log of {} unavailable: {e}", process.session);
                    missing.insert(process.session.clone());
                }
            }
        }
        (missing, timed_out)
    }

    fn classify_exits(
        &self,
        plan: &DeploymentPlan,
        exited: &BTreeSet<usize>,
    ) -> Option<OrchestrationError> {
        if exited.is_empty() {
            return None;
        }
        let total_hosts = plan.busy_slots();
        let failed_hosts: Vec<Host> = exited
            .iter()
            .filter_map(|&slot| plan.hosts.get(slot).cloned())
            .collect();
        let fraction = exited.len() as f64 / total_hosts.max(1) as f64;
        Some(OrchestrationError::RuntimeFailure {
            failed_hosts,
            total_hosts,
            fatal: fraction > self.policy.fatal_host_fraction,
        })
    }
}

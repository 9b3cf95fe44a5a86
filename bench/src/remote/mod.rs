//! Remote execution adapter
//!
//! The orchestrator never talks to a machine directly. It hands host sets to
//! a [`RemoteExecutor`], which fans every operation out concurrently over a
//! [`Transport`] (SSH for the fleet, a local shell for localhost benchmarks),
//! bounds each call by a timeout, and returns one result per host. A failing
//! or hung host never hides the results of the others.

mod local;
mod ssh;

use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use local::LocalTransport;
pub use ssh::SshTransport;

use crate::{commands::CommandMaker, instance::Host};

/// Failure of one remote call on one host
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("{operation} on {host} timed out after {after:?}")]
    Timeout {
        host: Host,
        operation: &'static str,
        after: Duration,
    },

    #[error("failed to spawn `{program}`: {reason}")]
    Spawn { program: String, reason: String },

    #[error("`{command}` exited with {code:?} on {host}: {stderr}")]
    CommandFailed {
        host: Host,
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("transfer {from} -> {to} via {host} failed: {reason}")]
    Transfer {
        host: Host,
        from: String,
        to: String,
        reason: String,
    },

    #[error("I/O error on {host}: {reason}")]
    Io { host: Host, reason: String },
}

impl RemoteError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Captured result of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub(crate) fn from_process(output: &std::process::Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        }
    }
}

/// Per-host primitive operations, provided by the transport mechanism
///
/// Implementations do not need to enforce timeouts; the executor does.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn run(&self, host: &Host, command: &str) -> Result<CommandOutput, RemoteError>;

    async fn upload(&self, host: &Host, local: &Path, remote: &str) -> Result<(), RemoteError>;

    async fn download(&self, host: &Host, remote: &str, local: &Path) -> Result<(), RemoteError>;
}

/// Per-call limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Limit for a single remote command
    pub command_secs: u64,
    /// Limit for a single file transfer
    pub transfer_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            command_secs: 30,
            transfer_secs: 120,
        }
    }
}

/// One file copy between this machine and a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub host: Host,
    pub local: PathBuf,
    pub remote: String,
}

/// Outcome of one operation fanned out over several hosts
#[derive(Debug)]
pub struct HostResults<T> {
    pub(crate) results: Vec<(Host, Result<T, RemoteError>)>,
}

impl<T> HostResults<T> {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.results.iter().all(|(_, r)| r.is_ok())
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Host, Result<T, RemoteError>)> {
        self.results.iter()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Host, &RemoteError)> {
        self.results
            .iter()
            .filter_map(|(host, r)| r.as_ref().err().map(|e| (host, e)))
    }

    /// Distinct hosts with at least one failure, in first-seen order
    #[must_use]
    pub fn failed_hosts(&self) -> Vec<Host> {
        unique_hosts(self.failures().map(|(host, _)| host))
    }

    /// True when something failed and every failure was a timeout
    #[must_use]
    pub fn only_timeouts(&self) -> bool {
        let mut failures = self.failures().peekable();
        failures.peek().is_some() && failures.all(|(_, e)| e.is_timeout())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<(Host, Result<T, RemoteError>)> {
        self.results
    }
}

/// Remove repeated hosts while keeping order
pub fn unique_hosts<'a>(hosts: impl IntoIterator<Item = &'a Host>) -> Vec<Host> {
    let mut seen = Vec::new();
    for host in hosts {
        if !seen.contains(host) {
            seen.push(host.clone());
        }
    }
    seen
}

/// Fans operations out over host sets with per-call timeouts
#[derive(Clone)]
pub struct RemoteExecutor {
    transport: Arc<dyn Transport>,
    command_timeout: Duration,
    transfer_timeout: Duration,
}

impl RemoteExecutor {
    pub fn new(transport: Arc<dyn Transport>, timeouts: Timeouts) -> Self {
        Self {
            transport,
            command_timeout: Duration::from_secs(timeouts.command_secs),
            transfer_timeout: Duration::from_secs(timeouts.transfer_secs),
        }
    }

    /// Run the same command once on every distinct host
    pub async fn run(&self, hosts: &[Host], command: &str) -> HostResults<CommandOutput> {
        let commands: Vec<(Host, String)> = unique_hosts(hosts)
            .into_iter()
            .map(|host| (host, command.to_string()))
            .collect();
        self.run_each(&commands).await
    }

    /// Run a distinct command per entry, all concurrently
    pub async fn run_each(&self, commands: &[(Host, String)]) -> HostResults<CommandOutput> {
        let calls = commands.iter().map(|(host, command)| async move {
            trace!("[{host}] $ {command}");
            let result = self
                .timed(host, "run", self.command_timeout, self.transport.run(host, command))
                .await;
            (host.clone(), result)
        });
        HostResults {
            results: join_all(calls).await,
        }
    }

    /// Like [`Self::run_each`], but a non-zero exit status is a failure
    pub async fn run_each_checked(
        &self,
        commands: &[(Host, String)],
    ) -> HostResults<CommandOutput> {
        let results = self
            .run_each(commands)
            .await
            .results
            .into_iter()
            .zip(commands)
            .map(|((host, result), (_, command))| {
                let result = result.and_then(|output| {
                    if output.success() {
                        Ok(output)
                    } else {
                        Err(RemoteError::CommandFailed {
                            host: host.clone(),
                            command: command.clone(),
                            code: output.exit_code,
                            stderr: output.stderr.trim().to_string(),
                        })
                    }
                });
                (host, result)
            })
            .collect();
        HostResults { results }
    }

    pub async fn upload(&self, transfers: &[Transfer]) -> HostResults<()> {
        debug!("Uploading {} file(s)", transfers.len());
        let calls = transfers.iter().map(|t| async move {
            let result = self
                .timed(
                    &t.host,
                    "upload",
                    self.transfer_timeout,
                    self.transport.upload(&t.host, &t.local, &t.remote),
                )
                .await;
            (t.host.clone(), result)
        });
        HostResults {
            results: join_all(calls).await,
        }
    }

    pub async fn download(&self, transfers: &[Transfer]) -> HostResults<()> {
        debug!("Downloading {} file(s)", transfers.len());
        let calls = transfers.iter().map(|t| async move {
            let result = self
                .timed(
                    &t.host,
                    "download",
                    self.transfer_timeout,
                    self.transport.download(&t.host, &t.remote, &t.local),
                )
                .await;
            (t.host.clone(), result)
        });
        HostResults {
            results: join_all(calls).await,
        }
    }

    /// Terminate every benchmark process on the given hosts
    pub async fn kill_all(&self, hosts: &[Host]) -> HostResults<CommandOutput> {
        self.run(hosts, &CommandMaker::kill()).await
    }

    async fn timed<T>(
        &self,
        host: &Host,
        operation: &'static str,
        limit: Duration,
        call: impl Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, RemoteError> {
        tokio::time::timeout(limit, call)
            .await
            .unwrap_or_else(|_| {
                Err(RemoteError::Timeout {
                    host: host.clone(),
                    operation,
                    after: limit,
                })
            })
    }
}

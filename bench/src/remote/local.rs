//! Transport for benchmarks on this machine
//!
//! Every "host" maps to the same working directory, so remote paths are
//! resolved relative to `root` and commands run through `sh -c` there.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use tokio::process::Command;

use super::{CommandOutput, RemoteError, Transport};
use crate::instance::Host;

#[derive(Debug, Clone)]
pub struct LocalTransport {
    root: PathBuf,
}

impl LocalTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, remote: &str) -> PathBuf {
        self.root.join(remote)
    }

    async fn copy(&self, host: &Host, from: &Path, to: &Path) -> Result<(), RemoteError> {
        if from == to {
            return Ok(());
        }
        let transfer_error = |e: std::io::Error| RemoteError::Transfer {
            host: host.clone(),
            from: from.display().to_string(),
            to: to.display().to_string(),
            reason: e.to_string(),
        };
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RemoteError::Io {
                    host: host.clone(),
                    reason: e.to_string(),
                })?;
        }
        tokio::fs::copy(from, to).await.map_err(transfer_error)?;
        Ok(())
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn run(&self, _host: &Host, command: &str) -> Result<CommandOutput, RemoteError> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RemoteError::Spawn {
                program: "sh".into(),
                reason: e.to_string(),
            })?;
        Ok(CommandOutput::from_process(&output))
    }

    async fn upload(&self, host: &Host, local: &Path, remote: &str) -> Result<(), RemoteError> {
        self.copy(host, local, &self.resolve(remote)).await
    }

    async fn download(&self, host: &Host, remote: &str, local: &Path) -> Result<(), RemoteError> {
        self.copy(host, &self.resolve(remote), local).await
    }
}

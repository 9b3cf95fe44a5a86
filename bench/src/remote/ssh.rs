//! SSH/SCP transport for fleet hosts

use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use tokio::process::Command;

use super::{CommandOutput, RemoteError, Transport};
use crate::{instance::Host, types::BenchmarkError};

/// Runs commands through the system `ssh` and copies files with `scp`
#[derive(Debug, Clone)]
pub struct SshTransport {
    ssh: PathBuf,
    scp: PathBuf,
    user: String,
    key: PathBuf,
    connect_timeout_secs: u64,
}

impl SshTransport {
    /// Locate `ssh` and `scp` on `PATH`
    pub fn new(user: &str, key: &Path, connect_timeout_secs: u64) -> Result<Self, BenchmarkError> {
        let ssh = which::which("ssh")
            .map_err(|e| BenchmarkError::Initialization(format!("ssh not found: {e}")))?;
        let scp = which::which("scp")
            .map_err(|e| BenchmarkError::Initialization(format!("scp not found: {e}")))?;
        Ok(Self {
            ssh,
            scp,
            user: user.to_string(),
            key: key.to_path_buf(),
            connect_timeout_secs,
        })
    }

    /// The `user@host` string handed to ssh/scp
    #[must_use]
    pub fn destination(&self, host: &Host) -> String {
        format!("{}@{}", self.user, host)
    }

    fn options(&self) -> Vec<String> {
        vec![
            "-o".into(),
            "StrictHostKeyChecking=no".into(),
            "-o".into(),
            "UserKnownHostsFile=/dev/null".into(),
            "-o".into(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            "-o".into(),
            "ServerAliveInterval=30".into(),
            "-o".into(),
            "ServerAliveCountMax=10".into(),
            "-o".into(),
            "LogLevel=ERROR".into(),
            "-i".into(),
            self.key.to_string_lossy().into(),
        ]
    }

    async fn copy(&self, host: &Host, from: String, to: String) -> Result<(), RemoteError> {
        let output = Command::new(&self.scp)
            .args(self.options())
            .arg(&from)
            .arg(&to)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RemoteError::Spawn {
                program: self.scp.display().to_string(),
                reason: e.to_string(),
            })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(RemoteError::Transfer {
                host: host.clone(),
                from,
                to,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn run(&self, host: &Host, command: &str) -> Result<CommandOutput, RemoteError> {
        let output = Command::new(&self.ssh)
            .args(self.options())
            .arg(self.destination(host))
            .arg(command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RemoteError::Spawn {
                program: self.ssh.display().to_string(),
                reason: e.to_string(),
            })?;
        Ok(CommandOutput::from_process(&output))
    }

    async fn upload(&self, host: &Host, local: &Path, remote: &str) -> Result<(), RemoteError> {
        let to = format!("{}:{remote}", self.destination(host));
        self.copy(host, local.display().to_string(), to).await
    }

    async fn download(&self, host: &Host, remote: &str, local: &Path) -> Result<(), RemoteError> {
        let from = format!("{}:{remote}", self.destination(host));
        self.copy(host, from, local.display().to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_carry_key_and_timeout() {
        let transport = SshTransport {
            ssh: PathBuf::from("/usr/bin/ssh"),
            scp: PathBuf::from("/usr/bin/scp"),
            user: "ubuntu".into(),
            key: PathBuf::from("/home/me/.ssh/bench.pem"),
            connect_timeout_secs: 7,
        };
        let options = transport.options();
        assert!(options.contains(&"ConnectTimeout=7".to_string()));
        assert_eq!(options.last().map(String::as_str), Some("/home/me/.ssh/bench.pem"));
        assert_eq!(transport.destination(&Host::from("10.0.0.3")), "ubuntu@10.0.0.3");
    }
}

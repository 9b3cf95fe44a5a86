//! Settings file support
//!
//! The settings file describes the environment a benchmark runs in: how to
//! reach the fleet, which repository to deploy, and how patient the
//! orchestrator is with slow or failing hosts. Every field has a default, so
//! `{}` is a valid settings file for local benchmarks.

use std::{collections::BTreeMap, fs, path::Path, path::PathBuf};

use anyhow::{Context, Result};
use bench_common::constants::DEFAULT_BASE_PORT;
use serde::{Deserialize, Serialize};

use crate::{
    commands::Repository,
    instance::{Host, HostInventory},
    orchestrator::Policy,
    remote::Timeouts,
};

/// How to log into fleet hosts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    pub user: String,
    /// Private key used for every host
    pub key_path: PathBuf,
    pub connect_timeout_secs: u64,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            user: "ubuntu".into(),
            key_path: PathBuf::from("~/.ssh/aws"),
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ssh: SshSettings,
    /// First port of the committee layout
    pub base_port: u16,
    pub repository: Repository,
    /// Fleet hosts per region
    pub hosts: BTreeMap<String, Vec<Host>>,
    pub timeouts: Timeouts,
    pub policy: Policy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ssh: SshSettings::default(),
            base_port: DEFAULT_BASE_PORT,
            repository: Repository::default(),
            hosts: BTreeMap::new(),
            timeouts: Timeouts::default(),
            policy: Policy::default(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read settings file: {}", path.as_ref().display())
        })?;

        let settings: Self = serde_json::from_str(&content).with_context(|| {
            format!("Failed to parse settings file: {}", path.as_ref().display())
        })?;

        settings.validate()?;

        Ok(settings)
    }

    /// Load settings if the file exists, defaults otherwise
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load_from_file(path)
        } else {
            log::debug!(
                "No settings file at {}, using defaults",
                path.as_ref().display()
            );
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.ssh.user.is_empty() {
            anyhow::bail!("ssh.user must not be empty");
        }
        if self.repository.name.is_empty() {
            anyhow::bail!("repository.name must not be empty");
        }
        if self.timeouts.command_secs == 0 || self.timeouts.transfer_secs == 0 {
            anyhow::bail!("Timeouts must be greater than zero");
        }
        let fraction = self.policy.fatal_host_fraction;
        if !(0.0..=1.0).contains(&fraction) {
            anyhow::bail!("policy.fatal_host_fraction must be within [0, 1], got {fraction}");
        }
        if self.policy.poll_interval_secs == 0 {
            anyhow::bail!("policy.poll_interval_secs must be greater than zero");
        }

        let mut seen = std::collections::HashSet::new();
        for host in self.hosts.values().flatten() {
            if !seen.insert(host) {
                anyhow::bail!("Duplicate host in inventory: {host}");
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn inventory(&self) -> HostInventory {
        HostInventory::new(self.hosts.clone())
    }
}

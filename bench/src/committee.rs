//! Committee layout and key material
//!
//! The committee file tells every process where its peers listen. Ports are
//! handed out sequentially from a base port, so the same hosts and
//! configuration always produce the same file.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    process::Stdio,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bench_common::BenchConfig;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::{
    commands::CommandMaker,
    instance::Host,
    types::{BenchmarkError, BenchmarkResult, OrchestrationError},
};

/// Key pair of one authority, as written by `node generate_keys`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    /// Public key, also the authority's name in the committee
    pub name: String,
    pub secret: String,
}

impl KeyPair {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read key file: {}", path.as_ref().display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse key file: {}", path.as_ref().display()))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self).context("Failed to serialize key pair")?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write key file: {}", path.as_ref().display()))
    }
}

/// Produces authority key pairs
#[async_trait]
pub trait KeyGenerator: Send + Sync {
    /// Write a fresh key pair to `path` and return it
    async fn generate(&self, path: &Path) -> BenchmarkResult<KeyPair>;
}

/// Generates keys with the locally built node binary
#[derive(Debug, Clone)]
pub struct NodeBinaryKeyGenerator {
    workdir: PathBuf,
}

impl NodeBinaryKeyGenerator {
    /// `workdir` must contain the `node` binary (or a link to it)
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }
}

#[async_trait]
impl KeyGenerator for NodeBinaryKeyGenerator {
    async fn generate(&self, path: &Path) -> BenchmarkResult<KeyPair> {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        let command = CommandMaker::generate_key(&path.display().to_string());
        let output = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;
        if !output.status.success() {
            return Err(BenchmarkError::Internal(format!(
                "`{command}` failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(KeyPair::load_from_file(&path)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryAddresses {
    pub primary_to_primary: String,
    pub worker_to_primary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerAddresses {
    pub primary_to_worker: String,
    /// Where load generators submit transactions
    pub transactions: String,
    pub worker_to_worker: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authority {
    pub stake: u32,
    pub primary: PrimaryAddresses,
    pub workers: BTreeMap<u32, WorkerAddresses>,
}

impl Authority {
    #[must_use]
    pub fn primary_host(&self) -> Host {
        host_of(&self.primary.primary_to_primary)
    }
}

impl WorkerAddresses {
    #[must_use]
    pub fn host(&self) -> Host {
        host_of(&self.transactions)
    }
}

fn host_of(address: &str) -> Host {
    let host = address.rsplit_once(':').map_or(address, |(host, _)| host);
    Host::from(host)
}

/// Committee file contents, plus the authority order used to build it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Committee {
    pub authorities: BTreeMap<String, Authority>,
    #[serde(skip)]
    order: Vec<String>,
}

impl Committee {
    /// Lay out authority `i` on `hosts` according to `config`
    ///
    /// Collocated: primary and workers of authority `i` share `hosts[i]`.
    /// Otherwise authority `i` takes `workers + 1` consecutive hosts, primary
    /// first.
    pub fn new(
        keys: &[KeyPair],
        hosts: &[Host],
        config: &BenchConfig,
        base_port: u16,
    ) -> Result<Self, OrchestrationError> {
        let workers = config.workers as usize;
        if keys.len() != config.nodes as usize || hosts.len() < config.hosts_required() {
            return Err(OrchestrationError::InvalidConfig {
                reason: format!(
                    "committee of {} needs {} key(s) and {} host(s), got {} and {}",
                    config.nodes,
                    config.nodes,
                    config.hosts_required(),
                    keys.len(),
                    hosts.len()
                ),
            });
        }

        let mut port = u32::from(base_port);
        let mut next = |host: &Host| -> Result<String, OrchestrationError> {
            let assigned = u16::try_from(port).map_err(|_| OrchestrationError::InvalidConfig {
                reason: format!("port range starting at {base_port} overflows"),
            })?;
            port += 1;
            Ok(format!("{host}:{assigned}"))
        };

        let mut authorities = BTreeMap::new();
        let mut order = Vec::with_capacity(keys.len());
        for (i, key) in keys.iter().enumerate() {
            let primary_host = if config.collocate {
                &hosts[i]
            } else {
                &hosts[i * (workers + 1)]
            };
            let primary = PrimaryAddresses {
                primary_to_primary: next(primary_host)?,
                worker_to_primary: next(primary_host)?,
            };
            let mut worker_map = BTreeMap::new();
            for j in 0..workers {
                let host = if config.collocate {
                    &hosts[i]
                } else {
                    &hosts[i * (workers + 1) + 1 + j]
                };
                worker_map.insert(
                    j as u32,
                    WorkerAddresses {
                        primary_to_worker: next(host)?,
                        transactions: next(host)?,
                        worker_to_worker: next(host)?,
                    },
                );
            }
            authorities.insert(
                key.name.clone(),
                Authority {
                    stake: 1,
                    primary,
                    workers: worker_map,
                },
            );
            order.push(key.name.clone());
        }
        Ok(Self { authorities, order })
    }

    /// Authority `i` in layout order
    #[must_use]
    pub fn authority(&self, i: usize) -> Option<&Authority> {
        self.order.get(i).and_then(|name| self.authorities.get(name))
    }

    /// Transaction addresses of every worker of the first `live` authorities
    #[must_use]
    pub fn transaction_addresses(&self, live: usize) -> Vec<String> {
        (0..live)
            .filter_map(|i| self.authority(i))
            .flat_map(|a| a.workers.values().map(|w| w.transactions.clone()))
            .collect()
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize committee")?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write committee file: {}", path.as_ref().display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(n: usize) -> Vec<KeyPair> {
        (0..n)
            .map(|i| KeyPair {
                name: format!("key{i}"),
                secret: format!("secret{i}"),
            })
            .collect()
    }

    fn hosts(n: usize) -> Vec<Host> {
        (1..=n).map(|i| Host::from(format!("10.0.0.{i}"))).collect()
    }

    #[test]
    fn test_collocated_ports_are_sequential() {
        let config = BenchConfig {
            nodes: 2,
            workers: 2,
            ..BenchConfig::default()
        };
        let committee = Committee::new(&keys(2), &hosts(2), &config, 5000).unwrap();

        let first = committee.authority(0).unwrap();
        assert_eq!(first.primary.primary_to_primary, "10.0.0.1:5000");
        assert_eq!(first.primary.worker_to_primary, "10.0.0.1:5001");
        assert_eq!(first.workers[&0].primary_to_worker, "10.0.0.1:5002");
        assert_eq!(first.workers[&0].transactions, "10.0.0.1:5003");
        assert_eq!(first.workers[&1].worker_to_worker, "10.0.0.1:5007");

        let second = committee.authority(1).unwrap();
        assert_eq!(second.primary.primary_to_primary, "10.0.0.2:5008");
        assert_eq!(second.primary_host(), Host::from("10.0.0.2"));
    }

    #[test]
    fn test_separate_hosts_per_role() {
        let config = BenchConfig {
            nodes: 2,
            workers: 1,
            collocate: false,
            ..BenchConfig::default()
        };
        let committee = Committee::new(&keys(2), &hosts(4), &config, 6000).unwrap();
        let second = committee.authority(1).unwrap();
        assert_eq!(second.primary_host(), Host::from("10.0.0.3"));
        assert_eq!(second.workers[&0].host(), Host::from("10.0.0.4"));
    }

    #[test]
    fn test_transaction_addresses_skip_faulty() {
        let config = BenchConfig {
            nodes: 4,
            faults: 1,
            ..BenchConfig::default()
        };
        let committee = Committee::new(&keys(4), &hosts(4), &config, 5000).unwrap();
        assert_eq!(committee.authorities.len(), 4);
        let addresses = committee.transaction_addresses(config.live_nodes() as usize);
        assert_eq!(
            addresses,
            vec!["10.0.0.1:5003", "10.0.0.2:5008", "10.0.0.3:5013"]
        );
    }

    #[test]
    fn test_rejects_port_overflow_and_short_fleet() {
        let config = BenchConfig::default();
        assert!(matches!(
            Committee::new(&keys(4), &hosts(4), &config, u16::MAX - 3),
            Err(OrchestrationError::InvalidConfig { .. })
        ));
        assert!(Committee::new(&keys(4), &hosts(3), &config, 5000).is_err());
    }

    #[test]
    fn test_committee_file_shape() {
        let config = BenchConfig {
            nodes: 1,
            ..BenchConfig::default()
        };
        let committee = Committee::new(&keys(1), &hosts(1), &config, 5000).unwrap();
        let json = serde_json::to_value(&committee).unwrap();
        assert_eq!(json["authorities"]["key0"]["stake"], 1);
        assert_eq!(
            json["authorities"]["key0"]["workers"]["0"]["transactions"],
            "10.0.0.1:5003"
        );
    }

    #[test]
    fn test_key_pair_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".node-0.json");
        let pair = keys(1).remove(0);
        pair.save_to_file(&path).unwrap();
        assert_eq!(KeyPair::load_from_file(&path).unwrap(), pair);
        assert!(KeyPair::load_from_file(dir.path().join("missing.json")).is_err());
    }
}

//! Fleet inventory
//!
//! Instance lifecycle (create/start/stop/terminate) belongs to the cloud
//! provider; the orchestrator only consumes a snapshot of the current
//! inventory, taken once per sweep through [`InstanceProvider::describe`].

use std::{collections::BTreeMap, fmt};

use async_trait::async_trait;
use bench_common::BenchConfig;
use serde::{Deserialize, Serialize};

use crate::types::BenchmarkResult;

/// Address of a fleet machine (IP or resolvable name)
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Host(String);

impl Host {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Host {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Host {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable snapshot of the fleet, grouped by region
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostInventory {
    regions: BTreeMap<String, Vec<Host>>,
}

impl HostInventory {
    #[must_use]
    pub fn new(regions: BTreeMap<String, Vec<Host>>) -> Self {
        Self { regions }
    }

    /// Inventory for local benchmarks: every authority runs on this machine
    #[must_use]
    pub fn localhost(slots: usize) -> Self {
        let hosts = vec![Host::from("127.0.0.1"); slots];
        Self::new(BTreeMap::from([("local".to_string(), hosts)]))
    }

    #[must_use]
    pub fn regions(&self) -> &BTreeMap<String, Vec<Host>> {
        &self.regions
    }

    /// All hosts, interleaved round-robin across regions
    ///
    /// Taking a prefix of this list spreads authorities over as many regions
    /// as possible.
    #[must_use]
    pub fn hosts(&self) -> Vec<Host> {
        let longest = self.regions.values().map(Vec::len).max().unwrap_or(0);
        (0..longest)
            .flat_map(|i| self.regions.values().filter_map(move |hosts| hosts.get(i)))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hosts for one configuration, or `None` if the fleet is too small
    #[must_use]
    pub fn select(&self, config: &BenchConfig) -> Option<Vec<Host>> {
        let needed = config.hosts_required();
        let hosts = self.hosts();
        (hosts.len() >= needed).then(|| hosts.into_iter().take(needed).collect())
    }
}

/// Source of the current fleet inventory
#[async_trait]
pub trait InstanceProvider: Send + Sync {
    async fn describe(&self) -> BenchmarkResult<HostInventory>;
}

/// Inventory read from the settings file
#[derive(Debug, Clone)]
pub struct StaticInventory {
    inventory: HostInventory,
}

impl StaticInventory {
    #[must_use]
    pub fn new(inventory: HostInventory) -> Self {
        Self { inventory }
    }
}

#[async_trait]
impl InstanceProvider for StaticInventory {
    async fn describe(&self) -> BenchmarkResult<HostInventory> {
        Ok(self.inventory.clone())
    }
}

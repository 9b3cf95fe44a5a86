//! Parameter sweeps
//!
//! A `Sweep` mirrors `BenchConfig` but every field may hold a list of
//! candidate values. Expansion is the cross product of all fields, taken
//! outer-to-inner in declaration order, so run numbering is reproducible.

use serde::{Deserialize, Serialize};

use crate::config::{BenchConfig, ConfigError};

/// Either a single value or an ordered list of candidates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    #[must_use]
    pub fn values(&self) -> &[T] {
        match self {
            Self::One(value) => std::slice::from_ref(value),
            Self::Many(values) => values,
        }
    }
}

impl<T> From<T> for OneOrMany<T> {
    fn from(value: T) -> Self {
        Self::One(value)
    }
}

impl<T> From<Vec<T>> for OneOrMany<T> {
    fn from(values: Vec<T>) -> Self {
        Self::Many(values)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sweep {
    pub faults: OneOrMany<u32>,
    pub nodes: OneOrMany<u32>,
    pub workers: OneOrMany<u32>,
    pub rate: OneOrMany<u64>,
    pub tx_size: OneOrMany<u64>,
    pub duration: OneOrMany<u64>,
    pub collocate: OneOrMany<bool>,
    pub runs: OneOrMany<u32>,
}

impl From<BenchConfig> for Sweep {
    fn from(config: BenchConfig) -> Self {
        Self {
            faults: config.faults.into(),
            nodes: config.nodes.into(),
            workers: config.workers.into(),
            rate: config.rate.into(),
            tx_size: config.tx_size.into(),
            duration: config.duration.into(),
            collocate: config.collocate.into(),
            runs: config.runs.into(),
        }
    }
}

impl Default for Sweep {
    fn default() -> Self {
        BenchConfig::default().into()
    }
}

impl Sweep {
    /// Expand into concrete configurations
    ///
    /// The first declared field varies slowest. Individual configurations are
    /// not validated here; an invalid point of the sweep is reported against
    /// that configuration only.
    pub fn expand(&self) -> Result<Vec<BenchConfig>, ConfigError> {
        let configs = vec![BenchConfig::default()];
        let configs = cross(configs, "faults", self.faults.values(), |c, v| c.faults = v)?;
        let configs = cross(configs, "nodes", self.nodes.values(), |c, v| c.nodes = v)?;
        let configs = cross(configs, "workers", self.workers.values(), |c, v| c.workers = v)?;
        let configs = cross(configs, "rate", self.rate.values(), |c, v| c.rate = v)?;
        let configs = cross(configs, "tx_size", self.tx_size.values(), |c, v| c.tx_size = v)?;
        let configs = cross(configs, "duration", self.duration.values(), |c, v| {
            c.duration = v;
        })?;
        let configs = cross(configs, "collocate", self.collocate.values(), |c, v| {
            c.collocate = v;
        })?;
        cross(configs, "runs", self.runs.values(), |c, v| c.runs = v)
    }

    /// Number of configurations the sweep expands to
    #[must_use]
    pub fn len(&self) -> usize {
        [
            self.faults.values().len(),
            self.nodes.values().len(),
            self.workers.values().len(),
            self.rate.values().len(),
            self.tx_size.values().len(),
            self.duration.values().len(),
            self.collocate.values().len(),
            self.runs.values().len(),
        ]
        .iter()
        .product()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn cross<T: Copy>(
    configs: Vec<BenchConfig>,
    field: &'static str,
    values: &[T],
    set: impl Fn(&mut BenchConfig, T),
) -> Result<Vec<BenchConfig>, ConfigError> {
    if values.is_empty() {
        return Err(ConfigError::EmptySweepField(field));
    }
    let mut expanded = Vec::with_capacity(configs.len() * values.len());
    for config in configs {
        for &value in values {
            let mut next = config;
            set(&mut next, value);
            expanded.push(next);
        }
    }
    Ok(expanded)
}

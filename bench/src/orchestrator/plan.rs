//! Per-configuration deployment plan
//!
//! Everything an attempt needs that does not change between attempts: the
//! selected hosts, the staged files, and the processes to launch.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
};

use bench_common::BenchConfig;

use crate::{
    commands::{CommandMaker, COMMITTEE_FILE, PARAMETERS_FILE},
    committee::Committee,
    instance::Host,
    remote::Transfer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Worker,
    Client,
}

/// One tmux session on one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Process {
    pub session: String,
    pub role: Role,
    pub host: Host,
    /// Index into the plan's host list; local runs reuse one address for
    /// several slots
    pub slot: usize,
    /// Foreground command, before wrapping in tmux
    pub command: String,
}

#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    pub config: BenchConfig,
    pub hosts: Vec<Host>,
    /// Directory holding the staged parameter, committee and key files
    pub staging: PathBuf,
    /// Remote working directory of every command
    pub workdir: String,
    /// Launch order: primaries, then workers, then clients
    pub processes: Vec<Process>,
    /// Key file indices each slot needs
    keys_per_slot: BTreeMap<usize, BTreeSet<usize>>,
}

impl DeploymentPlan {
    pub fn new(
        config: BenchConfig,
        hosts: Vec<Host>,
        committee: &Committee,
        staging: PathBuf,
        workdir: &str,
        debug: bool,
    ) -> Self {
        let workers = config.workers as usize;
        let live = config.live_nodes() as usize;
        let slot_of = |i: usize, worker: Option<usize>| match (config.collocate, worker) {
            (true, _) => i,
            (false, None) => i * (workers + 1),
            (false, Some(j)) => i * (workers + 1) + 1 + j,
        };

        let mut primaries = Vec::new();
        let mut worker_processes = Vec::new();
        let mut clients = Vec::new();
        let mut keys_per_slot: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
        let tx_addresses = committee.transaction_addresses(live);

        for i in 0..live {
            let Some(authority) = committee.authority(i) else {
                continue;
            };
            let keys = CommandMaker::key_file(i);

            let session = CommandMaker::primary_session(i);
            let slot = slot_of(i, None);
            keys_per_slot.entry(slot).or_default().insert(i);
            primaries.push(Process {
                command: CommandMaker::run_primary(&keys, &CommandMaker::db_path(&session), debug),
                session,
                role: Role::Primary,
                host: authority.primary_host(),
                slot,
            });

            for (&j, addresses) in &authority.workers {
                let j = j as usize;
                let slot = slot_of(i, Some(j));
                keys_per_slot.entry(slot).or_default().insert(i);

                let session = CommandMaker::worker_session(i, j);
                worker_processes.push(Process {
                    command: CommandMaker::run_worker(
                        &keys,
                        &CommandMaker::db_path(&session),
                        j,
                        debug,
                    ),
                    session,
                    role: Role::Worker,
                    host: addresses.host(),
                    slot,
                });

                clients.push(Process {
                    session: CommandMaker::client_session(i, j),
                    role: Role::Client,
                    host: addresses.host(),
                    slot,
                    command: CommandMaker::run_client(
                        &addresses.transactions,
                        config.tx_size,
                        config.rate_per_client(),
                        &tx_addresses,
                    ),
                });
            }
        }

        let mut processes = primaries;
        processes.append(&mut worker_processes);
        processes.append(&mut clients);

        Self {
            config,
            hosts,
            staging,
            workdir: workdir.to_string(),
            processes,
            keys_per_slot,
        }
    }

    /// Path of `name` on a host
    #[must_use]
    pub fn remote_path(&self, name: &str) -> String {
        if self.workdir.is_empty() || self.workdir == "." {
            name.to_string()
        } else {
            format!("{}/{name}", self.workdir)
        }
    }

    /// Wrap a command so it runs in the working directory
    #[must_use]
    pub fn remote_command(&self, command: &str) -> String {
        CommandMaker::in_dir(&self.workdir, command)
    }

    /// Files to upload: shared files to every host, key files where needed
    #[must_use]
    pub fn uploads(&self) -> Vec<Transfer> {
        let mut needed: BTreeMap<&Host, BTreeSet<usize>> = BTreeMap::new();
        for (slot, host) in self.hosts.iter().enumerate() {
            let entry = needed.entry(host).or_default();
            if let Some(keys) = self.keys_per_slot.get(&slot) {
                entry.extend(keys);
            }
        }

        let mut transfers = Vec::new();
        for (host, keys) in needed {
            let files = [PARAMETERS_FILE.to_string(), COMMITTEE_FILE.to_string()]
                .into_iter()
                .chain(keys.into_iter().map(CommandMaker::key_file));
            for file in files {
                transfers.push(Transfer {
                    host: host.clone(),
                    local: self.staging.join(&file),
                    remote: self.remote_path(&file),
                });
            }
        }
        transfers
    }

    /// `(host, command)` launching every process of `role`
    #[must_use]
    pub fn launch_commands(&self, role: Role) -> Vec<(Host, String)> {
        self.processes
            .iter()
            .filter(|p| p.role == role)
            .map(|p| {
                let command = CommandMaker::background(&p.session, &p.command);
                (p.host.clone(), self.remote_command(&command))
            })
            .collect()
    }

    /// Number of distinct slots running at least one process
    #[must_use]
    pub fn busy_slots(&self) -> usize {
        self.processes
            .iter()
            .map(|p| p.slot)
            .collect::<BTreeSet<_>>()
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::committee::KeyPair;

    fn plan(config: BenchConfig, hosts: Vec<Host>) -> DeploymentPlan {
        let keys: Vec<KeyPair> = (0..config.nodes)
            .map(|i| KeyPair {
                name: format!("k{i}"),
                secret: String::new(),
            })
            .collect();
        let committee = Committee::new(&keys, &hosts, &config, 5000).unwrap();
        DeploymentPlan::new(
            config,
            hosts,
            &committee,
            PathBuf::from("/tmp/stage"),
            "narwhal",
            false,
        )
    }

    fn hosts(n: usize) -> Vec<Host> {
        (1..=n).map(|i| Host::from(format!("10.0.0.{i}"))).collect()
    }

    #[test]
    fn test_launch_order_and_faulty_nodes() {
        let config = BenchConfig {
            nodes: 4,
            faults: 1,
            workers: 2,
            rate: 60_000,
            ..BenchConfig::default()
        };
        let plan = plan(config, hosts(4));
        let sessions: Vec<&str> = plan.processes.iter().map(|p| p.session.as_str()).collect();
        assert_eq!(sessions.len(), 3 + 6 + 6);
        assert_eq!(sessions[..3], ["primary-0", "primary-1", "primary-2"]);
        assert_eq!(sessions[3], "worker-0-0");
        assert_eq!(sessions[9], "client-0-0");
        assert!(!sessions.iter().any(|s| s.contains("-3")));

        // 60 000 tx/s over 3 live nodes x 2 workers
        assert!(plan.processes[9].command.contains("--rate 10000"));
        assert_eq!(plan.busy_slots(), 3);
    }

    #[test]
    fn test_launch_commands_run_in_workdir() {
        let plan = plan(BenchConfig::default(), hosts(4));
        let commands = plan.launch_commands(Role::Primary);
        assert_eq!(commands.len(), 4);
        assert_eq!(commands[2].0, Host::from("10.0.0.3"));
        assert!(commands[2].1.starts_with("cd narwhal && tmux new -d -s \"primary-2\""));
    }

    #[test]
    fn test_uploads_send_keys_where_needed() {
        let config = BenchConfig {
            nodes: 2,
            collocate: false,
            ..BenchConfig::default()
        };
        let plan = plan(config, hosts(4));
        let uploads = plan.uploads();
        // every host gets parameters and committee plus its authority's key
        assert_eq!(uploads.len(), 4 * 3);
        let third: Vec<&str> = uploads
            .iter()
            .filter(|t| t.host == Host::from("10.0.0.4"))
            .map(|t| t.remote.as_str())
            .collect();
        assert_eq!(
            third,
            [
                "narwhal/.parameters.json",
                "narwhal/.committee.json",
                "narwhal/.node-1.json"
            ]
        );
    }

    #[test]
    fn test_local_slots_share_one_host() {
        let config = BenchConfig::default();
        let plan = plan(config, vec![Host::from("127.0.0.1"); 4]);
        let uploads = plan.uploads();
        assert_eq!(uploads.len(), 2 + 4);
        assert_eq!(plan.busy_slots(), 4);
        assert_eq!(plan.remote_path("logs/primary-0.log"), "narwhal/logs/primary-0.log");
    }
}

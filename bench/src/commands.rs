//! Shell command construction
//!
//! Every command the orchestrator sends to a host is built here, so the
//! process and file naming conventions stay in one place.

use std::fmt::Write;

/// Node parameter file shared by every process
pub const PARAMETERS_FILE: &str = ".parameters.json";
/// Committee file shared by every process
pub const COMMITTEE_FILE: &str = ".committee.json";
/// Directory, relative to the working directory, holding process logs
pub const LOGS_DIR: &str = "logs";

/// Source repository of the benchmarked node
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Repository {
    pub name: String,
    pub url: String,
    pub branch: String,
}

impl Default for Repository {
    fn default() -> Self {
        Self {
            name: "narwhal".into(),
            url: "https://github.com/facebookresearch/narwhal.git".into(),
            branch: "master".into(),
        }
    }
}

pub struct CommandMaker;

impl CommandMaker {
    /// Key file of authority `i`
    #[must_use]
    pub fn key_file(i: usize) -> String {
        format!(".node-{i}.json")
    }

    /// Storage directory of a process
    #[must_use]
    pub fn db_path(session: &str) -> String {
        format!(".db-{session}")
    }

    #[must_use]
    pub fn primary_session(i: usize) -> String {
        format!("primary-{i}")
    }

    #[must_use]
    pub fn worker_session(i: usize, j: usize) -> String {
        format!("worker-{i}-{j}")
    }

    #[must_use]
    pub fn client_session(i: usize, j: usize) -> String {
        format!("client-{i}-{j}")
    }

    /// Log file written by a tmux session
    #[must_use]
    pub fn log_file(session: &str) -> String {
        format!("{LOGS_DIR}/{session}.log")
    }

    /// Remove stale databases and configuration files
    #[must_use]
    pub fn cleanup() -> String {
        format!("rm -rf .db-* ; rm -f .*.json ; mkdir -p {LOGS_DIR}")
    }

    #[must_use]
    pub fn clean_logs() -> String {
        format!("rm -rf {LOGS_DIR} ; mkdir -p {LOGS_DIR}")
    }

    /// Prepare a fresh machine: toolchain, clone and build
    #[must_use]
    pub fn install(repo: &Repository) -> String {
        [
            "sudo apt-get update".to_string(),
            "sudo apt-get -y install build-essential cmake clang tmux".to_string(),
            "curl --proto '=https' --tlsv1.2 -sSf https://sh.rustup.rs | sh -s -- -y".to_string(),
            ". $HOME/.cargo/env".to_string(),
            "rustup default stable".to_string(),
            format!("(git clone {} || (cd {} ; git pull))", repo.url, repo.name),
        ]
        .join(" && ")
    }

    /// Check out the configured branch and build the benchmark binaries
    #[must_use]
    pub fn update(repo: &Repository) -> String {
        format!(
            "(cd {name} && git fetch -f && git checkout -f {branch} && git pull -f) && \
             (cd {name} && . $HOME/.cargo/env && {compile}) && \
             (cd {name} && {alias})",
            name = repo.name,
            branch = repo.branch,
            compile = Self::compile(),
            alias = Self::alias_binaries("target/release"),
        )
    }

    #[must_use]
    pub fn compile() -> String {
        "cargo build --quiet --release --features benchmark".into()
    }

    /// Link the built binaries into the working directory
    #[must_use]
    pub fn alias_binaries(origin: &str) -> String {
        format!(
            "rm -f node benchmark_client ; \
             ln -s {origin}/node . ; ln -s {origin}/benchmark_client ."
        )
    }

    #[must_use]
    pub fn generate_key(filename: &str) -> String {
        format!("./node generate_keys --filename {filename}")
    }

    #[must_use]
    pub fn run_primary(keys: &str, store: &str, debug: bool) -> String {
        format!(
            "./node {} run --keys {keys} --committee {COMMITTEE_FILE} --store {store} \
             --parameters {PARAMETERS_FILE} primary",
            verbosity(debug)
        )
    }

    #[must_use]
    pub fn run_worker(keys: &str, store: &str, id: usize, debug: bool) -> String {
        format!(
            "./node {} run --keys {keys} --committee {COMMITTEE_FILE} --store {store} \
             --parameters {PARAMETERS_FILE} worker --id {id}",
            verbosity(debug)
        )
    }

    /// Load generator targeting `address`, aware of every live worker
    #[must_use]
    pub fn run_client(address: &str, tx_size: u64, rate: u64, nodes: &[String]) -> String {
        let mut command =
            format!("./benchmark_client {address} --size {tx_size} --rate {rate}");
        if !nodes.is_empty() {
            let _ = write!(command, " --nodes {}", nodes.join(" "));
        }
        command
    }

    /// Wrap `command` in a detached tmux session teeing to its log file
    ///
    /// `tee` ignores SIGINT so the output written after `stop` still reaches
    /// the log.
    #[must_use]
    pub fn background(session: &str, command: &str) -> String {
        format!(
            "tmux new -d -s \"{session}\" \"{command} 2>&1 | tee -i {}\"",
            Self::log_file(session)
        )
    }

    /// Exits with status 0 while the session is alive
    #[must_use]
    pub fn alive(session: &str) -> String {
        format!("tmux has-session -t \"{session}\"")
    }

    /// Ask a session's process to shut down cleanly
    #[must_use]
    pub fn stop(session: &str) -> String {
        format!("tmux send-keys -t \"{session}\" C-c")
    }

    #[must_use]
    pub fn kill() -> String {
        "tmux kill-server".to_string()
    }

    /// Run `command` from `dir` on the host
    #[must_use]
    pub fn in_dir(dir: &str, command: &str) -> String {
        if dir.is_empty() || dir == "." {
            command.to_string()
        } else {
            format!("cd {dir} && {command}")
        }
    }
}

fn verbosity(debug: bool) -> &'static str {
    if debug {
        "-vvv"
    } else {
        "-vv"
    }
}

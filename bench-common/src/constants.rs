/// Smallest transaction the load generator can emit: sample transactions
/// carry an 8-byte identifier behind a one-byte kind marker.
pub const MIN_TX_SIZE: u64 = 9;

/// First port handed out when laying out a committee.
pub const DEFAULT_BASE_PORT: u16 = 5000;

/// Message prefix of a block commit line, e.g. `Committed B12(aGVsbG8=) -> 30 tx`.
pub const COMMIT_TAG: &str = "Committed B";

/// Separator between the commit header and its transaction count.
pub const COMMIT_COUNT_SEPARATOR: &str = " -> ";

/// Optional trailer of a commit line listing the sample ids it contains.
pub const COMMIT_SAMPLES_TAG: &str = "samples=";

/// Message prefix of a sample injection line, e.g. `Sending sample transaction 7 (512 B)`.
pub const SAMPLE_TAG: &str = "Sending sample transaction ";

/// Substring that marks a panic anywhere in a log.
pub const PANIC_TAG: &str = "panicked";

/// Terminal marker written on clean shutdown.
pub const BENCHMARK_END_MARKER: &str = "Benchmark ended";

//! Utility Functions Module
//!
//! Statistics helpers and JSON file I/O shared by the aggregator and the
//! result store. Statistics over an empty input are undefined and return
//! `None`; a missing measurement must never read as a measured zero.
//!
//! ## Example Usage
//!
//! ```rust
//! use bench::utils::{calculate_average, calculate_percentile};
//!
//! let data = vec![1.0, 2.0, 3.0, 4.0, 5.0];
//! assert_eq!(calculate_average(&data), Some(3.0));
//! assert_eq!(calculate_percentile(&data, 95.0), Some(5.0));
//! assert_eq!(calculate_average(&[]), None);
//! ```

use std::{fs, path::Path};

use serde::{de::DeserializeOwned, Serialize};

use crate::types::{BenchmarkResult, LatencyStats};

/// Arithmetic mean
pub fn calculate_average(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Population standard deviation
pub fn calculate_std_dev(values: &[f64]) -> Option<f64> {
    let mean = calculate_average(values)?;
    let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// Nearest-rank percentile
///
/// `rank = ceil(p / 100 * N)`, clamped to `[1, N]`; the result is the
/// `rank`-th smallest value. Input order does not matter.
pub fn calculate_percentile(values: &[f64], percentile: f64) -> Option<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    percentile_of_sorted(&sorted, percentile)
}

fn percentile_of_sorted(sorted: &[f64], percentile: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (percentile / 100.0 * sorted.len() as f64).ceil() as usize;
    Some(sorted[rank.clamp(1, sorted.len()) - 1])
}

/// Latency statistics over pooled samples (ms)
pub fn build_latency_stats(latencies: &[f64]) -> Option<LatencyStats> {
    let mut sorted = latencies.to_vec();
    sorted.sort_by(f64::total_cmp);

    Some(LatencyStats {
        mean_ms: calculate_average(&sorted)?,
        p50_ms: percentile_of_sorted(&sorted, 50.0)?,
        p95_ms: percentile_of_sorted(&sorted, 95.0)?,
        p99_ms: percentile_of_sorted(&sorted, 99.0)?,
        max_ms: *sorted.last()?,
    })
}

/// Saves any serializable data structure to a JSON file
///
/// # Errors
///
/// Fails if the data cannot be serialized or the file cannot be written.
pub fn save_json_results<T: Serialize>(data: &T, path: impl AsRef<Path>) -> BenchmarkResult<()> {
    let json = serde_json::to_string_pretty(data)?;
    fs::write(path.as_ref(), json)?;

    log::debug!("Saved {}", path.as_ref().display());
    Ok(())
}

/// Loads a JSON file written by [`save_json_results`]
pub fn load_json_results<T: DeserializeOwned>(path: impl AsRef<Path>) -> BenchmarkResult<T> {
    let content = fs::read_to_string(path.as_ref())?;
    Ok(serde_json::from_str(&content)?)
}

/// Formats a rate with thousands separators, e.g. `48,250`
pub fn format_count(value: f64) -> String {
    let digits = format!("{:.0}", value.max(0.0));
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

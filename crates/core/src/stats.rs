//! Run statistics over execution history.
//!
//! Percentiles use the nearest-rank method on durations sorted ascending:
//! `rank = ceil(p / 100 * n)`, clamped to `1..=n`. No interpolation, so the
//! result is always one of the observed durations and identical inputs
//! always give identical outputs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::execution::ExecutionRecord;

/// Aggregated run statistics over a window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub total_runs: usize,
    pub successful_runs: usize,
    pub failed_runs: usize,
    /// Percent, 0-100. Zero when there are no completed runs.
    pub success_rate: f64,
    pub avg_duration: Duration,
    pub p50_duration: Duration,
    pub p95_duration: Duration,
    pub p99_duration: Duration,
}

/// Nearest-rank percentile of an ascending-sorted slice.
///
/// Returns `None` for an empty slice. `p` is clamped to `0..=100`.
pub fn percentile(sorted: &[Duration], p: f64) -> Option<Duration> {
    if sorted.is_empty() {
        return None;
    }
    let n = sorted.len();
    let p = p.clamp(0.0, 100.0);
    let rank = (p * n as f64 / 100.0).ceil() as usize;
    let rank = rank.clamp(1, n);
    Some(sorted[rank - 1])
}

/// Durations of completed runs, sorted ascending.
///
/// With `successful_only` failed runs are left out, which keeps crash-fast
/// failures from dragging duration percentiles down.
pub fn sorted_durations<'a, I>(records: I, successful_only: bool) -> Vec<Duration>
where
    I: IntoIterator<Item = &'a ExecutionRecord>,
{
    let mut durations: Vec<Duration> = records
        .into_iter()
        .filter(|r| !successful_only || r.succeeded)
        .filter_map(ExecutionRecord::duration)
        .collect();
    durations.sort();
    durations
}

/// Success rate in percent over completed runs. `None` when nothing completed.
pub fn success_rate<'a, I>(records: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a ExecutionRecord>,
{
    let (total, ok) = records
        .into_iter()
        .filter(|r| !r.is_running())
        .fold((0usize, 0usize), |(t, s), r| (t + 1, s + r.succeeded as usize));
    (total > 0).then(|| ok as f64 / total as f64 * 100.0)
}

/// Compute [`Metrics`] from a set of records. Running records are ignored.
///
/// Duration statistics cover successful runs only.
pub fn compute_metrics(records: &[ExecutionRecord]) -> Metrics {
    let completed: Vec<&ExecutionRecord> = records.iter().filter(|r| !r.is_running()).collect();
    let total_runs = completed.len();
    let successful_runs = completed.iter().filter(|r| r.succeeded).count();

    let durations = sorted_durations(completed.iter().copied(), true);
    let avg_duration = if durations.is_empty() {
        Duration::ZERO
    } else {
        durations.iter().sum::<Duration>() / durations.len() as u32
    };

    Metrics {
        total_runs,
        successful_runs,
        failed_runs: total_runs - successful_runs,
        success_rate: success_rate(completed.iter().copied()).unwrap_or(0.0),
        avg_duration,
        p50_duration: percentile(&durations, 50.0).unwrap_or_default(),
        p95_duration: percentile(&durations, 95.0).unwrap_or_default(),
        p99_duration: percentile(&durations, 99.0).unwrap_or_default(),
    }
}

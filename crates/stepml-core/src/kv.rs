//! Per-step KV-length estimation.
//!
//! Step traces do not carry per-request KV-cache lengths. They are
//! approximated by joining each step window with the lifecycle records of
//! the requests in flight during it: a request's progress index at the step
//! start (prompt tokens plus output tokens emitted so far) stands in for its
//! KV length.

use crate::lifecycle::LifecycleRecord;
use crate::trace::StepRecord;
use serde::{Deserialize, Serialize};

/// Aggregate KV statistics over the requests overlapping one step.
///
/// A step with no overlapping requests gets all zeros.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct KvStats {
    pub kv_mean: f64,
    pub kv_max: f64,
    pub kv_sum: f64,
    /// Population standard deviation; 0 with fewer than two requests.
    pub kv_std: f64,
    pub kv_count: u64,
}

impl KvStats {
    fn from_lengths(lengths: &[f64]) -> Self {
        if lengths.is_empty() {
            return Self::default();
        }
        let n = lengths.len() as f64;
        let sum: f64 = lengths.iter().sum();
        let mean = sum / n;
        let max = lengths.iter().copied().fold(f64::MIN, f64::max);
        let std = if lengths.len() > 1 {
            (lengths.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
        } else {
            0.0
        };
        Self {
            kv_mean: mean,
            kv_max: max,
            kv_sum: sum,
            kv_std: std,
            kv_count: lengths.len() as u64,
        }
    }
}

/// KV statistics for a single step window `[step_start_ns, step_end_ns)`.
pub fn estimate_step_kv(
    step_start_ns: i64,
    step_end_ns: i64,
    lifecycle: &[LifecycleRecord],
) -> KvStats {
    let lengths: Vec<f64> = lifecycle
        .iter()
        .filter(|r| r.overlaps(step_start_ns, step_end_ns))
        .map(|r| r.progress_index_at(step_start_ns) as f64)
        .collect();
    KvStats::from_lengths(&lengths)
}

/// KV statistics for every step, in input order.
///
/// Steps missing either timestamp cannot be placed in time and get
/// all-zero statistics.
pub fn extract_kv_features(steps: &[StepRecord], lifecycle: &[LifecycleRecord]) -> Vec<KvStats> {
    steps
        .iter()
        .map(|step| match step.window_ns() {
            Some((start, end)) => estimate_step_kv(start, end, lifecycle),
            None => KvStats::default(),
        })
        .collect()
}

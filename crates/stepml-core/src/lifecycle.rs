//! Per-request lifecycle ingestion.
//!
//! The lifecycle file is a single JSON array with one entry per request.
//! Times are floating-point seconds; request ids are array positions.

use crate::error::DataError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default lifecycle file path inside an experiment directory.
pub const LIFECYCLE_FILE: &str = "results/per_request_lifecycle_metrics.json";

/// The observed timeline of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleRecord {
    /// 0-based position in the lifecycle array.
    pub request_id: usize,
    /// Arrival time in seconds.
    pub start_time: f64,
    /// Completion time in seconds, never before `start_time`.
    pub end_time: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Output-token emission times in seconds, ascending.
    pub output_token_times: Vec<f64>,
}

impl LifecycleRecord {
    /// Start time truncated to integer nanoseconds.
    pub fn start_ns(&self) -> i64 {
        (self.start_time * 1e9) as i64
    }

    /// End time truncated to integer nanoseconds.
    pub fn end_ns(&self) -> i64 {
        (self.end_time * 1e9) as i64
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn e2e_seconds(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Whether the request was in flight during `[step_start_ns, step_end_ns)`.
    pub fn overlaps(&self, step_start_ns: i64, step_end_ns: i64) -> bool {
        self.start_ns() < step_end_ns && self.end_ns() > step_start_ns
    }

    /// Estimated tokens processed when a step starts: the prompt plus every
    /// output token emitted strictly before `step_start_ns`.
    pub fn progress_index_at(&self, step_start_ns: i64) -> u64 {
        let step_start_s = step_start_ns as f64 / 1e9;
        // Emission times are sorted at load, so the scan can stop early.
        let generated = self
            .output_token_times
            .iter()
            .take_while(|&&t| t < step_start_s)
            .count();
        self.input_tokens + generated as u64
    }
}

#[derive(Debug, Deserialize)]
struct RawInfo {
    input_tokens: u64,
    output_tokens: u64,
    #[serde(default)]
    output_token_times: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    start_time: f64,
    end_time: f64,
    info: RawInfo,
}

/// Load one experiment's lifecycle file.
pub fn load_lifecycle(path: &Path) -> Result<Vec<LifecycleRecord>, DataError> {
    let content = std::fs::read_to_string(path).map_err(|e| DataError::io(path, e))?;
    let records = parse_lifecycle(&content, path)?;
    tracing::debug!(
        path = %path.display(),
        requests = records.len(),
        "lifecycle loaded"
    );
    Ok(records)
}

/// Parse a lifecycle JSON array. `origin` is only used in errors and logs.
pub fn parse_lifecycle(content: &str, origin: &Path) -> Result<Vec<LifecycleRecord>, DataError> {
    let entries: Vec<RawEntry> =
        serde_json::from_str(content).map_err(|e| DataError::malformed(origin, e.line(), &e))?;

    let mut records = Vec::with_capacity(entries.len());
    for (request_id, entry) in entries.into_iter().enumerate() {
        if entry.end_time < entry.start_time {
            return Err(DataError::malformed(
                origin,
                0,
                format!(
                    "request {}: end_time {} precedes start_time {}",
                    request_id, entry.end_time, entry.start_time
                ),
            ));
        }

        let mut times = entry.info.output_token_times;
        if times.windows(2).any(|w| w[1] < w[0]) {
            tracing::warn!(
                path = %origin.display(),
                request_id,
                "output token times out of order, sorting"
            );
            times.sort_by(f64::total_cmp);
        }
        if entry.info.output_tokens > 0 && times.len() as u64 != entry.info.output_tokens {
            tracing::warn!(
                path = %origin.display(),
                request_id,
                output_tokens = entry.info.output_tokens,
                emissions = times.len(),
                "emission count differs from output token count"
            );
        }

        records.push(LifecycleRecord {
            request_id,
            start_time: entry.start_time,
            end_time: entry.end_time,
            input_tokens: entry.info.input_tokens,
            output_tokens: entry.info.output_tokens,
            output_token_times: times,
        });
    }
    Ok(records)
}

//! Step-level trace ingestion.
//!
//! Trace files are newline-delimited OpenTelemetry JSON exports. Each line is
//! one `resourceSpans` collection; the simulator records one
//! `step.BATCH_SUMMARY` span event per traced scheduling step, whose
//! attributes are flattened into a [`StepRecord`].

use crate::error::DataError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// Default trace file name inside an experiment directory.
pub const TRACE_FILE: &str = "traces.json";

/// Event name of the per-step batch summary.
pub const BATCH_SUMMARY_EVENT: &str = "step.BATCH_SUMMARY";

/// Attribute keys emitted by the simulator.
pub mod columns {
    pub const STEP_ID: &str = "step.id";
    pub const TS_START_NS: &str = "step.ts_start_ns";
    pub const TS_END_NS: &str = "step.ts_end_ns";
    pub const DURATION_US: &str = "step.duration_us";
    pub const PREFILL_TOKENS: &str = "batch.prefill_tokens";
    pub const DECODE_TOKENS: &str = "batch.decode_tokens";
    pub const SCHEDULED_TOKENS: &str = "batch.scheduled_tokens";
    pub const NUM_PREFILL_REQS: &str = "batch.num_prefill_reqs";
    pub const NUM_DECODE_REQS: &str = "batch.num_decode_reqs";
    pub const NUM_FINISHED: &str = "batch.num_finished";
    pub const NUM_PREEMPTED: &str = "batch.num_preempted";
    pub const RUNNING_DEPTH: &str = "queue.running_depth";
    pub const WAITING_DEPTH: &str = "queue.waiting_depth";
    pub const KV_BLOCKS_FREE: &str = "kv.blocks_free_gpu";
    pub const KV_BLOCKS_TOTAL: &str = "kv.blocks_total_gpu";
    pub const KV_USAGE_RATIO: &str = "kv.usage_gpu_ratio";
}

/// A typed attribute value as found in the trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Int(i64),
    Double(f64),
    Str(String),
}

impl AttrValue {
    /// Coerce to an integer. Non-integral or unparsable values give `None`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            AttrValue::Double(v) if v.is_finite() && v.fract() == 0.0 => Some(*v as i64),
            AttrValue::Double(_) => None,
            AttrValue::Str(s) => {
                let s = s.trim();
                s.parse::<i64>().ok().or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|v| v.is_finite() && v.fract() == 0.0)
                        .map(|v| v as i64)
                })
            }
        }
    }

    /// Coerce to a float. Unparsable strings give `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Int(v) => Some(*v as f64),
            AttrValue::Double(v) => Some(*v),
            AttrValue::Str(s) => s.trim().parse::<f64>().ok(),
        }
    }
}

/// One traced scheduling step.
///
/// Known columns are typed and optional; `None` marks a missing or
/// uncoercible attribute. Attributes the schema does not know are kept in
/// [`StepRecord::extra`] with their original type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    #[serde(rename = "step.id")]
    pub step_id: Option<i64>,
    #[serde(rename = "step.ts_start_ns")]
    pub ts_start_ns: Option<i64>,
    #[serde(rename = "step.ts_end_ns")]
    pub ts_end_ns: Option<i64>,
    #[serde(rename = "step.duration_us")]
    pub duration_us: Option<i64>,
    #[serde(rename = "batch.prefill_tokens")]
    pub prefill_tokens: Option<i64>,
    #[serde(rename = "batch.decode_tokens")]
    pub decode_tokens: Option<i64>,
    #[serde(rename = "batch.scheduled_tokens")]
    pub scheduled_tokens: Option<i64>,
    #[serde(rename = "batch.num_prefill_reqs")]
    pub num_prefill_reqs: Option<i64>,
    #[serde(rename = "batch.num_decode_reqs")]
    pub num_decode_reqs: Option<i64>,
    #[serde(rename = "batch.num_finished")]
    pub num_finished: Option<i64>,
    #[serde(rename = "batch.num_preempted")]
    pub num_preempted: Option<i64>,
    #[serde(rename = "queue.running_depth")]
    pub running_depth: Option<i64>,
    #[serde(rename = "queue.waiting_depth")]
    pub waiting_depth: Option<i64>,
    #[serde(rename = "kv.blocks_free_gpu")]
    pub kv_blocks_free: Option<i64>,
    #[serde(rename = "kv.blocks_total_gpu")]
    pub kv_blocks_total: Option<i64>,
    #[serde(rename = "kv.usage_gpu_ratio")]
    pub kv_usage_ratio: Option<f64>,
    /// Experiment directory basename.
    pub experiment_id: String,
    /// Attributes outside the known schema. Serialized under an `extra`
    /// object so they never collide with row-level columns.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, AttrValue>,
}

impl StepRecord {
    /// Build a record from flattened event attributes.
    pub fn from_attributes<I>(experiment_id: &str, attributes: I) -> Self
    where
        I: IntoIterator<Item = (String, AttrValue)>,
    {
        let mut record = StepRecord {
            experiment_id: experiment_id.to_string(),
            ..Default::default()
        };
        for (key, value) in attributes {
            if let Some(slot) = record.int_column(&key) {
                *slot = value.as_i64();
            } else if key == columns::KV_USAGE_RATIO {
                record.kv_usage_ratio = value.as_f64();
            } else {
                record.extra.insert(key, value);
            }
        }
        record
    }

    fn int_column(&mut self, key: &str) -> Option<&mut Option<i64>> {
        use columns::*;
        let slot = match key {
            STEP_ID => &mut self.step_id,
            TS_START_NS => &mut self.ts_start_ns,
            TS_END_NS => &mut self.ts_end_ns,
            DURATION_US => &mut self.duration_us,
            PREFILL_TOKENS => &mut self.prefill_tokens,
            DECODE_TOKENS => &mut self.decode_tokens,
            SCHEDULED_TOKENS => &mut self.scheduled_tokens,
            NUM_PREFILL_REQS => &mut self.num_prefill_reqs,
            NUM_DECODE_REQS => &mut self.num_decode_reqs,
            NUM_FINISHED => &mut self.num_finished,
            NUM_PREEMPTED => &mut self.num_preempted,
            RUNNING_DEPTH => &mut self.running_depth,
            WAITING_DEPTH => &mut self.waiting_depth,
            KV_BLOCKS_FREE => &mut self.kv_blocks_free,
            KV_BLOCKS_TOTAL => &mut self.kv_blocks_total,
            _ => return None,
        };
        Some(slot)
    }

    /// Step window `[start, end)` in nanoseconds, if both ends are known.
    pub fn window_ns(&self) -> Option<(i64, i64)> {
        Some((self.ts_start_ns?, self.ts_end_ns?))
    }

    /// Difference between the recorded duration and the one implied by the
    /// timestamps, in microseconds. Healthy traces stay within ±1 µs.
    pub fn duration_drift_us(&self) -> Option<f64> {
        let (start, end) = self.window_ns()?;
        let recorded = self.duration_us? as f64;
        Some(recorded - (end - start) as f64 / 1000.0)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct OtelValue {
    /// OTLP JSON encodes 64-bit ints as strings; some exporters emit numbers.
    #[serde(rename = "intValue")]
    int_value: Option<serde_json::Value>,
    #[serde(rename = "doubleValue")]
    double_value: Option<serde_json::Value>,
    #[serde(rename = "stringValue")]
    string_value: Option<String>,
}

impl OtelValue {
    fn into_attr(self) -> Option<AttrValue> {
        if let Some(v) = self.int_value {
            return Some(match v {
                serde_json::Value::Number(n) => match n.as_i64() {
                    Some(i) => AttrValue::Int(i),
                    None => AttrValue::Double(n.as_f64().unwrap_or(f64::NAN)),
                },
                serde_json::Value::String(s) => match s.trim().parse::<i64>() {
                    Ok(i) => AttrValue::Int(i),
                    Err(_) => AttrValue::Str(s),
                },
                other => AttrValue::Str(other.to_string()),
            });
        }
        if let Some(v) = self.double_value {
            return Some(match v {
                serde_json::Value::Number(n) => AttrValue::Double(n.as_f64().unwrap_or(f64::NAN)),
                serde_json::Value::String(s) => match s.trim().parse::<f64>() {
                    Ok(f) => AttrValue::Double(f),
                    Err(_) => AttrValue::Str(s),
                },
                other => AttrValue::Str(other.to_string()),
            });
        }
        self.string_value.map(AttrValue::Str)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct OtelAttribute {
    key: String,
    #[serde(default)]
    value: Option<OtelValue>,
}

#[derive(Debug, Clone, Deserialize)]
struct OtelEvent {
    #[serde(default)]
    name: String,
    #[serde(default)]
    attributes: Vec<OtelAttribute>,
}

#[derive(Debug, Clone, Deserialize)]
struct OtelSpan {
    #[serde(default)]
    events: Vec<OtelEvent>,
}

#[derive(Debug, Clone, Deserialize)]
struct OtelScopeSpans {
    #[serde(default)]
    spans: Vec<OtelSpan>,
}

#[derive(Debug, Clone, Deserialize)]
struct OtelResourceSpans {
    #[serde(rename = "scopeSpans", default)]
    scope_spans: Vec<OtelScopeSpans>,
}

#[derive(Debug, Clone, Deserialize)]
struct OtelTrace {
    #[serde(rename = "resourceSpans", default)]
    resource_spans: Vec<OtelResourceSpans>,
}

/// Load one experiment's trace file.
///
/// `experiment_id` is attached to every record; `event_name` selects the
/// batch-summary events (normally [`BATCH_SUMMARY_EVENT`]).
pub fn load_trace(
    path: &Path,
    experiment_id: &str,
    event_name: &str,
) -> Result<Vec<StepRecord>, DataError> {
    let file = File::open(path).map_err(|e| DataError::io(path, e))?;
    let records = parse_trace(BufReader::new(file), path, experiment_id, event_name)?;
    tracing::debug!(
        path = %path.display(),
        steps = records.len(),
        "trace loaded"
    );
    Ok(records)
}

/// Parse trace JSONL from any reader. `origin` is only used in errors.
pub fn parse_trace<R: Read>(
    reader: BufReader<R>,
    origin: &Path,
    experiment_id: &str,
    event_name: &str,
) -> Result<Vec<StepRecord>, DataError> {
    let mut records = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| DataError::io(origin, e))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let trace: OtelTrace = serde_json::from_str(trimmed)
            .map_err(|e| DataError::malformed(origin, line_num + 1, e))?;

        let events = trace
            .resource_spans
            .into_iter()
            .flat_map(|rs| rs.scope_spans)
            .flat_map(|ss| ss.spans)
            .flat_map(|span| span.events)
            .filter(|event| event.name == event_name);

        for event in events {
            let attributes = event
                .attributes
                .into_iter()
                .filter_map(|a| Some((a.key, a.value?.into_attr()?)));
            records.push(StepRecord::from_attributes(experiment_id, attributes));
        }
    }
    Ok(records)
}

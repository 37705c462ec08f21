//! Fixture builders shared by the integration tests.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use stepml_core::lifecycle::LIFECYCLE_FILE;
use stepml_core::trace::TRACE_FILE;

/// One traced step: (step_id, ts_start_ns, ts_end_ns, prefill, decode).
pub type Step = (i64, i64, i64, i64, i64);

/// One request: (start_s, end_s, input_tokens, output_token_times).
pub type Request = (f64, f64, u64, Vec<f64>);

/// A single OTLP JSON line carrying one batch-summary event.
pub fn trace_line(step: Step) -> String {
    let (step_id, start, end, prefill, decode) = step;
    let duration_us = (end - start) / 1000;
    serde_json::json!({
        "resourceSpans": [{
            "scopeSpans": [{
                "spans": [{
                    "name": "scheduler.step",
                    "events": [
                        {
                            "name": "step.BATCH_SUMMARY",
                            "attributes": [
                                {"key": "step.id", "value": {"intValue": step_id.to_string()}},
                                {"key": "step.ts_start_ns", "value": {"intValue": start.to_string()}},
                                {"key": "step.ts_end_ns", "value": {"intValue": end.to_string()}},
                                {"key": "step.duration_us", "value": {"intValue": duration_us.to_string()}},
                                {"key": "batch.prefill_tokens", "value": {"intValue": prefill.to_string()}},
                                {"key": "batch.decode_tokens", "value": {"intValue": decode.to_string()}},
                                {"key": "kv.usage_gpu_ratio", "value": {"doubleValue": 0.5}}
                            ]
                        },
                        {"name": "step.REQUEST_DETAIL", "attributes": []}
                    ]
                }]
            }]
        }]
    })
    .to_string()
}

pub fn trace_jsonl(steps: &[Step]) -> String {
    let mut out = String::new();
    for &step in steps {
        out.push_str(&trace_line(step));
        out.push('\n');
    }
    out
}

pub fn lifecycle_json(requests: &[Request]) -> String {
    let entries: Vec<serde_json::Value> = requests
        .iter()
        .map(|(start, end, input, times)| {
            serde_json::json!({
                "start_time": start,
                "end_time": end,
                "info": {
                    "input_tokens": input,
                    "output_tokens": times.len(),
                    "output_token_times": times,
                }
            })
        })
        .collect();
    serde_json::Value::Array(entries).to_string()
}

/// Create an experiment directory under `root` with the given inputs.
pub fn write_experiment(
    root: &Path,
    id: &str,
    steps: Option<&[Step]>,
    requests: Option<&[Request]>,
) -> PathBuf {
    let dir = root.join(id);
    fs::create_dir_all(&dir).unwrap();
    if let Some(steps) = steps {
        fs::write(dir.join(TRACE_FILE), trace_jsonl(steps)).unwrap();
    }
    if let Some(requests) = requests {
        let path = dir.join(LIFECYCLE_FILE);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, lifecycle_json(requests)).unwrap();
    }
    dir
}

/// `n` consecutive 1 ms steps starting at 1 s.
pub fn steady_steps(n: i64) -> Vec<Step> {
    (0..n)
        .map(|i| {
            let start = 1_000_000_000 + i * 1_000_000;
            (i * 3, start, start + 1_000_000, 64 + i, 8)
        })
        .collect()
}

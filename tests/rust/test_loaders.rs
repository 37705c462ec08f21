/// Integration tests for trace, lifecycle and experiment-id loading.
mod common;

use std::fs;
use stepml_core::experiment::{normalize_model_name, parse_experiment_metadata};
use stepml_core::kv::{estimate_step_kv, extract_kv_features, KvStats};
use stepml_core::lifecycle::load_lifecycle;
use stepml_core::trace::{load_trace, AttrValue, BATCH_SUMMARY_EVENT};
use stepml_core::DataError;

#[test]
fn test_load_trace_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("traces.json");
    let steps = common::steady_steps(4);
    fs::write(&path, common::trace_jsonl(&steps)).unwrap();

    let records = load_trace(&path, "exp-a", BATCH_SUMMARY_EVENT).unwrap();
    assert_eq!(records.len(), 4);
    for (record, step) in records.iter().zip(&steps) {
        assert_eq!(record.step_id, Some(step.0));
        assert_eq!(record.ts_start_ns, Some(step.1));
        assert_eq!(record.ts_end_ns, Some(step.2));
        assert_eq!(record.duration_us, Some(1000));
        assert_eq!(record.prefill_tokens, Some(step.3));
        assert_eq!(record.decode_tokens, Some(8));
        assert_eq!(record.kv_usage_ratio, Some(0.5));
        assert_eq!(record.experiment_id, "exp-a");
        assert_eq!(record.duration_drift_us(), Some(0.0));
    }
    // Attributes without a typed column are absent, not defaulted.
    assert_eq!(records[0].running_depth, None);
}

#[test]
fn test_load_trace_other_event_name() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("traces.json");
    fs::write(&path, common::trace_jsonl(&common::steady_steps(3))).unwrap();

    let records = load_trace(&path, "exp-a", "step.REQUEST_DETAIL").unwrap();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.step_id.is_none()));
}

#[test]
fn test_load_trace_skips_blank_lines_and_keeps_unknown_attributes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("traces.json");
    let line = common::trace_line((7, 0, 2_000, 1, 1)).replace(
        r#"{"key":"kv.usage_gpu_ratio""#,
        r#"{"key":"sched.policy","value":{"stringValue":"fcfs"}},{"key":"kv.usage_gpu_ratio""#,
    );
    fs::write(&path, format!("\n{}\n\n", line)).unwrap();

    let records = load_trace(&path, "exp", BATCH_SUMMARY_EVENT).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].step_id, Some(7));
    assert_eq!(
        records[0].extra.get("sched.policy"),
        Some(&AttrValue::Str("fcfs".to_string()))
    );
}

#[test]
fn test_load_trace_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_trace(&dir.path().join("absent.json"), "exp", BATCH_SUMMARY_EVENT).unwrap_err();
    assert!(matches!(err, DataError::MissingFile { .. }));
}

#[test]
fn test_load_trace_malformed_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("traces.json");
    let content = format!("{}\n{{not json\n", common::trace_line((0, 0, 1_000, 1, 1)));
    fs::write(&path, content).unwrap();

    match load_trace(&path, "exp", BATCH_SUMMARY_EVENT).unwrap_err() {
        DataError::MalformedData { line, path: p, .. } => {
            assert_eq!(line, 2);
            assert_eq!(p, path);
        }
        other => panic!("expected MalformedData, got {:?}", other),
    }
}

#[test]
fn test_load_lifecycle_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lifecycle.json");
    let requests: Vec<common::Request> = vec![
        (0.0, 0.5, 100, vec![0.1, 0.2, 0.3]),
        // Emission times out of order are sorted on load.
        (0.2, 1.0, 40, vec![0.9, 0.4, 0.6]),
    ];
    fs::write(&path, common::lifecycle_json(&requests)).unwrap();

    let records = load_lifecycle(&path).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].request_id, 0);
    assert_eq!(records[1].request_id, 1);
    assert_eq!(records[0].total_tokens(), 103);
    assert_eq!(records[1].output_token_times, vec![0.4, 0.6, 0.9]);
    assert!((records[1].e2e_seconds() - 0.8).abs() < 1e-12);
    assert_eq!(records[1].start_ns(), 200_000_000);
}

#[test]
fn test_load_lifecycle_rejects_end_before_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lifecycle.json");
    fs::write(&path, common::lifecycle_json(&[(2.0, 1.0, 10, vec![])])).unwrap();
    assert!(matches!(
        load_lifecycle(&path).unwrap_err(),
        DataError::MalformedData { .. }
    ));
}

#[test]
fn test_load_lifecycle_missing_and_malformed() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.json");
    assert!(matches!(
        load_lifecycle(&missing).unwrap_err(),
        DataError::MissingFile { .. }
    ));

    let broken = dir.path().join("broken.json");
    fs::write(&broken, r#"[{"start_time": 0.0}]"#).unwrap();
    assert!(matches!(
        load_lifecycle(&broken).unwrap_err(),
        DataError::MalformedData { .. }
    ));
}

#[test]
fn test_kv_features_from_loaded_files() {
    let dir = tempfile::tempdir().unwrap();
    let trace_path = dir.path().join("traces.json");
    let lifecycle_path = dir.path().join("lifecycle.json");

    // Steps: [1.0, 1.1) s and [2.0, 2.1) s, plus one far later.
    let steps: Vec<common::Step> = vec![
        (0, 1_000_000_000, 1_100_000_000, 10, 2),
        (1, 2_000_000_000, 2_100_000_000, 0, 2),
        (2, 9_000_000_000, 9_100_000_000, 0, 0),
    ];
    let requests: Vec<common::Request> = vec![
        (0.5, 2.5, 100, vec![0.8, 1.5, 1.9, 2.05]),
        (1.05, 3.0, 20, vec![1.5, 2.2]),
    ];
    fs::write(&trace_path, common::trace_jsonl(&steps)).unwrap();
    fs::write(&lifecycle_path, common::lifecycle_json(&requests)).unwrap();

    let records = load_trace(&trace_path, "exp", BATCH_SUMMARY_EVENT).unwrap();
    let lifecycle = load_lifecycle(&lifecycle_path).unwrap();
    let kv = extract_kv_features(&records, &lifecycle);
    assert_eq!(kv.len(), 3);

    // Step 0: request 0 has emitted one token (0.8 < 1.0); request 1 has
    // started inside the window with none emitted.
    assert_eq!(kv[0].kv_count, 2);
    assert_eq!(kv[0].kv_sum, 101.0 + 20.0);
    assert_eq!(kv[0].kv_max, 101.0);

    // Step 1: request 0 has emitted three tokens, request 1 one.
    assert_eq!(kv[1].kv_count, 2);
    assert_eq!(kv[1].kv_mean, (103.0 + 21.0) / 2.0);
    assert_eq!(kv[1].kv_std, 41.0);

    assert_eq!(kv[2], KvStats::default());
    assert_eq!(
        estimate_step_kv(1_000_000_000, 1_100_000_000, &lifecycle),
        kv[0]
    );
}

#[test]
fn test_experiment_metadata_strict_and_fallback() {
    let meta = parse_experiment_metadata("20260217-155451-llama-2-7b-tp1-codegen").unwrap();
    assert_eq!(meta.timestamp, "20260217-155451");
    assert_eq!(meta.model, "llama-2-7b");
    assert_eq!(meta.tp, 1);
    assert_eq!(meta.workload, "codegen");

    let meta = parse_experiment_metadata("20260218-084319-mixtral-8x7b-v0-1-tp2-general").unwrap();
    assert_eq!(meta.model, "mixtral-8x7b-v0-1");
    assert_eq!(meta.tp, 2);

    // Workload with a hyphen only matches through the anchor fallback.
    let meta = parse_experiment_metadata("20260218-084319-codellama-34b-tp2-chat-long").unwrap();
    assert_eq!(meta.timestamp, "20260218-084319");
    assert_eq!(meta.model, "codellama-34b");
    assert_eq!(meta.tp, 2);
    assert_eq!(meta.workload, "chat-long");

    let json = serde_json::to_string(&meta).unwrap();
    let back: stepml_core::ExperimentMeta = serde_json::from_str(&json).unwrap();
    assert_eq!(back, meta);
}

#[test]
fn test_experiment_metadata_errors() {
    assert!(matches!(
        parse_experiment_metadata("not-an-experiment"),
        Err(DataError::Parse(_))
    ));
    assert!(matches!(
        parse_experiment_metadata("20260217-155451-llama-2-7b-tp0-codegen"),
        Err(DataError::Parse(_))
    ));
}

#[test]
fn test_normalize_model_name() {
    assert_eq!(normalize_model_name("llama-2-7b-hf"), "llama-2-7b");
    assert_eq!(normalize_model_name("llama-2-7b"), "llama-2-7b");
    assert_eq!(normalize_model_name("hf-model"), "hf-model");
}

#[test]
fn test_invalid_utf8_is_malformed() {
    let dir = tempfile::tempdir().unwrap();
    let mut bytes = common::trace_line((0, 0, 1_000, 1, 1)).into_bytes();
    bytes.extend_from_slice(b"\n{\"resourceSpans\": [\xff\xfe]}\n");

    let trace_path = dir.path().join("traces.json");
    fs::write(&trace_path, &bytes).unwrap();
    assert!(matches!(
        load_trace(&trace_path, "exp", BATCH_SUMMARY_EVENT).unwrap_err(),
        DataError::MalformedData { .. }
    ));

    let lifecycle_path = dir.path().join("lifecycle.json");
    fs::write(&lifecycle_path, b"[{\"start_time\": \xc3\x28}]").unwrap();
    assert!(matches!(
        load_lifecycle(&lifecycle_path).unwrap_err(),
        DataError::MalformedData { .. }
    ));
}

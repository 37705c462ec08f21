/// Integration tests for dataset assembly over an experiment tree.
mod common;

use std::fs;
use std::io::BufRead;
use stepml_core::dataset::{
    load_all_experiments, load_all_experiments_with_kv, load_experiment_steps, DatasetLayout,
};
use stepml_core::trace::TRACE_FILE;
use stepml_core::DataError;

const EXP_LLAMA: &str = "20260217-155451-llama-2-7b-tp1-codegen";
const EXP_MIXTRAL: &str = "20260218-084319-mixtral-8x7b-v0-1-tp2-general";
const EXP_NO_LIFECYCLE: &str = "20260219-101010-qwen-7b-tp1-reasoning";

fn requests() -> Vec<common::Request> {
    vec![
        (0.9, 1.2, 100, vec![1.0005, 1.05, 1.1]),
        (1.0, 1.5, 50, vec![1.2, 1.3]),
    ]
}

/// Two complete experiments, one without lifecycle data, one directory
/// with no trace, one malformed trace and one unparsable id.
fn data_root() -> tempfile::TempDir {
    let root = tempfile::tempdir().unwrap();
    let r = root.path();
    common::write_experiment(r, EXP_LLAMA, Some(&common::steady_steps(10)), Some(&requests()));
    common::write_experiment(r, EXP_MIXTRAL, Some(&common::steady_steps(5)), Some(&requests()));
    common::write_experiment(r, EXP_NO_LIFECYCLE, Some(&common::steady_steps(4)), None);
    common::write_experiment(r, "20260220-000000-empty-tp1-codegen", None, None);

    let broken = common::write_experiment(r, "20260221-000000-broken-tp1-codegen", None, None);
    fs::write(broken.join(TRACE_FILE), "{\"resourceSpans\": [\n").unwrap();

    common::write_experiment(r, "scratch", Some(&common::steady_steps(2)), None);

    // Stray files at the root are ignored.
    fs::write(r.join("README.txt"), "notes").unwrap();
    root
}

#[test]
fn test_assemble_without_kv() {
    let root = data_root();
    let assembly = load_all_experiments(root.path(), &DatasetLayout::default()).unwrap();

    assert_eq!(assembly.loaded, vec![EXP_LLAMA, EXP_MIXTRAL, EXP_NO_LIFECYCLE]);
    assert_eq!(assembly.skipped, vec!["20260220-000000-empty-tp1-codegen"]);
    assert_eq!(assembly.failures.len(), 2);
    let failed: Vec<&str> = assembly
        .failures
        .iter()
        .map(|f| f.experiment_id.as_str())
        .collect();
    assert_eq!(failed, vec!["20260221-000000-broken-tp1-codegen", "scratch"]);

    assert_eq!(assembly.table.len(), 10 + 5 + 4);
    assert!(assembly.table.rows.iter().all(|r| r.kv.is_none()));

    let mixtral: Vec<_> = assembly
        .table
        .rows
        .iter()
        .filter(|r| r.record.experiment_id == EXP_MIXTRAL)
        .collect();
    assert_eq!(mixtral.len(), 5);
    assert!(mixtral.iter().all(|r| r.meta.model == "mixtral-8x7b-v0-1"));
    assert!(mixtral.iter().all(|r| r.meta.tp == 2 && r.meta.workload == "general"));
}

#[test]
fn test_assemble_with_kv_requires_lifecycle() {
    let root = data_root();
    let assembly = load_all_experiments_with_kv(root.path(), &DatasetLayout::default()).unwrap();

    assert_eq!(assembly.loaded, vec![EXP_LLAMA, EXP_MIXTRAL]);
    assert!(assembly.skipped.contains(&EXP_NO_LIFECYCLE.to_string()));
    assert_eq!(assembly.table.len(), 15);
    assert!(assembly.table.rows.iter().all(|r| r.kv.is_some()));

    // First step spans [1.000, 1.001) s: both requests are in flight.
    // Request 0 has emitted nothing before 1.000 s, request 1 has just started.
    let first = assembly.table.rows[0].kv.unwrap();
    assert_eq!(first.kv_count, 2);
    assert_eq!(first.kv_sum, 150.0);

    // Step 9 spans [1.009, 1.010) s: request 0 has emitted one token.
    let last = assembly.table.rows[9].kv.unwrap();
    assert_eq!(last.kv_sum, 151.0);
}

#[test]
fn test_load_experiment_steps() {
    let root = data_root();
    let dir = root.path().join(EXP_LLAMA);
    let steps = load_experiment_steps(&dir, &DatasetLayout::default()).unwrap();
    assert_eq!(steps.len(), 10);
    assert!(steps.iter().all(|s| s.experiment_id == EXP_LLAMA));

    let missing = root.path().join("20260220-000000-empty-tp1-codegen");
    assert!(matches!(
        load_experiment_steps(&missing, &DatasetLayout::default()),
        Err(DataError::MissingFile { .. })
    ));
}

#[test]
fn test_missing_data_root() {
    let root = tempfile::tempdir().unwrap();
    let result = load_all_experiments(&root.path().join("nope"), &DatasetLayout::default());
    assert!(matches!(result, Err(DataError::MissingFile { .. })));
}

#[test]
fn test_custom_layout() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join(EXP_LLAMA);
    fs::create_dir_all(dir.join("otel")).unwrap();
    fs::write(
        dir.join("otel/steps.jsonl"),
        common::trace_jsonl(&common::steady_steps(3)),
    )
    .unwrap();

    let layout = DatasetLayout {
        trace_file: "otel/steps.jsonl".into(),
        ..Default::default()
    };
    let assembly = load_all_experiments(root.path(), &layout).unwrap();
    assert_eq!(assembly.table.len(), 3);

    let default = load_all_experiments(root.path(), &DatasetLayout::default()).unwrap();
    assert!(default.table.is_empty());
    assert_eq!(default.skipped, vec![EXP_LLAMA]);
}

#[test]
fn test_write_jsonl_round_trip() {
    let root = data_root();
    let assembly = load_all_experiments_with_kv(root.path(), &DatasetLayout::default()).unwrap();
    let out = root.path().join("table.jsonl");
    assembly.table.write_jsonl(&out).unwrap();

    let file = fs::File::open(&out).unwrap();
    let lines: Vec<String> = std::io::BufReader::new(file)
        .lines()
        .map(|l| l.unwrap())
        .collect();
    assert_eq!(lines.len(), assembly.table.len());

    let row: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(row["experiment_id"], EXP_LLAMA);
    assert_eq!(row["model"], "llama-2-7b");
    assert_eq!(row["workload"], "codegen");
    assert_eq!(row["step.id"], 0);
    assert_eq!(row["batch.prefill_tokens"], 64);
    assert_eq!(row["kv_count"], 2);

    assert!(assembly.table.inconsistent_durations(1.0).is_empty());
    assert_eq!(assembly.table.all_samples().len(), assembly.table.len());
}

#[test]
fn test_duplicate_step_ids_fail_the_experiment() {
    let root = tempfile::tempdir().unwrap();
    let dup = "20260222-000000-llama-2-7b-tp1-codegen";
    let steps: Vec<common::Step> = [0, 0, 1, 1, 2, 2, 3, 3, 4]
        .iter()
        .enumerate()
        .map(|(i, &id)| {
            let start = i as i64 * 1_000_000;
            (id, start, start + 1_000_000, 32, 4)
        })
        .collect();
    common::write_experiment(root.path(), dup, Some(&steps), None);
    common::write_experiment(root.path(), EXP_MIXTRAL, Some(&common::steady_steps(5)), None);

    let assembly = load_all_experiments(root.path(), &DatasetLayout::default()).unwrap();
    assert_eq!(assembly.loaded, vec![EXP_MIXTRAL]);
    assert_eq!(assembly.table.len(), 5);
    assert_eq!(assembly.failures.len(), 1);
    assert_eq!(assembly.failures[0].experiment_id, dup);
    assert!(assembly.failures[0].error.contains("duplicate step.id 0"));

    assert!(matches!(
        load_experiment_steps(&root.path().join(dup), &DatasetLayout::default()),
        Err(DataError::MalformedData { .. })
    ));
}

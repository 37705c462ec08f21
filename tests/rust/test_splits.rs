/// Integration tests for temporal, random and leave-one-group-out splits.
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashSet};
use stepml_core::dataset::{StepRow, StepTable};
use stepml_core::experiment::parse_experiment_metadata;
use stepml_core::splits::{
    leave_one_group_out, leave_one_model_out, leave_one_workload_out, random_split, temporal_split,
    Fold, GroupKey, Split, SplitFractions,
};
use stepml_core::trace::StepRecord;

const EXPERIMENTS: &[(&str, usize)] = &[
    ("20260217-155451-llama-2-7b-tp1-codegen", 100),
    ("20260217-160000-llama-2-7b-hf-tp1-reasoning", 137),
    ("20260218-084319-mixtral-8x7b-v0-1-tp2-general", 250),
    ("20260218-090000-codellama-34b-tp2-codegen", 61),
];

/// Rows of every experiment interleaved in shuffled order, with sparse,
/// non-contiguous step ids.
fn build_table() -> StepTable {
    let mut rows = Vec::new();
    for (e, &(id, n)) in EXPERIMENTS.iter().enumerate() {
        let meta = parse_experiment_metadata(id).unwrap();
        for s in 0..n as i64 {
            rows.push(StepRow {
                record: StepRecord {
                    step_id: Some(s * 7 + e as i64),
                    prefill_tokens: Some(100 + s),
                    decode_tokens: Some(16),
                    duration_us: Some(1_000 + s),
                    experiment_id: id.to_string(),
                    ..Default::default()
                },
                meta: meta.clone(),
                kv: None,
            });
        }
    }
    rows.shuffle(&mut ChaCha8Rng::seed_from_u64(7));
    StepTable::new(rows)
}

fn assert_partition(split: &Split, n: usize) {
    let train: HashSet<usize> = split.train.iter().copied().collect();
    let valid: HashSet<usize> = split.valid.iter().copied().collect();
    let test: HashSet<usize> = split.test.iter().copied().collect();
    assert!(train.is_disjoint(&valid));
    assert!(train.is_disjoint(&test));
    assert!(valid.is_disjoint(&test));
    assert_eq!(train.len() + valid.len() + test.len(), n);
    assert_eq!(split.train.len() + split.valid.len() + split.test.len(), n);
}

fn by_experiment(table: &StepTable, indices: &[usize]) -> BTreeMap<String, Vec<i64>> {
    let mut groups: BTreeMap<String, Vec<i64>> = BTreeMap::new();
    for &i in indices {
        let record = &table.rows[i].record;
        groups
            .entry(record.experiment_id.clone())
            .or_default()
            .push(record.step_id.unwrap());
    }
    groups
}

#[test]
fn test_temporal_split_partitions_rows() {
    let table = build_table();
    let split = temporal_split(&table, SplitFractions::default(), 42);
    assert_partition(&split, table.len());
}

#[test]
fn test_temporal_split_orders_within_each_experiment() {
    let table = build_table();
    let split = temporal_split(&table, SplitFractions::default(), 42);
    let train = by_experiment(&table, &split.train);
    let valid = by_experiment(&table, &split.valid);
    let test = by_experiment(&table, &split.test);

    for &(id, n) in EXPERIMENTS {
        let (tr, va, te) = (&train[id], &valid[id], &test[id]);
        assert!(!tr.is_empty() && !va.is_empty() && !te.is_empty(), "{}", id);
        assert!(tr.iter().max() < va.iter().min(), "{}", id);
        assert!(va.iter().max() < te.iter().min(), "{}", id);

        let n = n as f64;
        assert!((tr.len() as f64 / n - 0.6).abs() <= 0.02, "{}", id);
        assert!((va.len() as f64 / n - 0.2).abs() <= 0.02, "{}", id);
        assert!((te.len() as f64 / n - 0.2).abs() <= 0.02, "{}", id);
    }
}

#[test]
fn test_temporal_split_ignores_seed() {
    let table = build_table();
    let a = temporal_split(&table, SplitFractions::default(), 1);
    let b = temporal_split(&table, SplitFractions::default(), 2);
    assert_eq!(a, b);
}

#[test]
fn test_temporal_split_custom_fractions() {
    let table = build_table();
    let fractions = SplitFractions {
        train: 0.7,
        valid: 0.1,
    };
    let split = temporal_split(&table, fractions, 0);
    assert_partition(&split, table.len());
    let train = by_experiment(&table, &split.train);
    // 0.7 * 100 = 70 rows of the first experiment.
    assert_eq!(train[EXPERIMENTS[0].0].len(), 70);
}

#[test]
fn test_random_split_reproducible() {
    let table = build_table();
    let a = random_split(table.len(), SplitFractions::default(), 42);
    let b = random_split(table.len(), SplitFractions::default(), 42);
    let c = random_split(table.len(), SplitFractions::default(), 43);
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_partition(&a, table.len());

    // Rows are mixed across time: some experiment has test rows that
    // precede some of its training rows.
    let train = by_experiment(&table, &a.train);
    let test = by_experiment(&table, &a.test);
    assert!(EXPERIMENTS
        .iter()
        .any(|(id, _)| test[*id].iter().min() < train[*id].iter().max()));
}

fn assert_folds_cover(folds: &[Fold], n: usize) {
    let mut seen = HashSet::new();
    for fold in folds {
        let train: HashSet<usize> = fold.train.iter().copied().collect();
        assert!(fold.test.iter().all(|i| !train.contains(i)));
        assert_eq!(fold.train.len() + fold.test.len(), n);
        for &i in &fold.test {
            assert!(seen.insert(i), "row {} held out twice", i);
        }
    }
    assert_eq!(seen.len(), n);
}

#[test]
fn test_leave_one_model_out_normalizes_names() {
    let table = build_table();
    let result = leave_one_model_out(&table);
    let holdouts: Vec<&str> = result.folds.iter().map(|f| f.holdout.as_str()).collect();
    assert_eq!(holdouts, vec!["codellama-34b", "llama-2-7b", "mixtral-8x7b-v0-1"]);
    assert_folds_cover(&result.folds, table.len());

    for fold in &result.folds {
        assert!(fold
            .test
            .iter()
            .all(|&i| result.table.rows[i].meta.model == fold.holdout));
        assert!(fold
            .train
            .iter()
            .all(|&i| result.table.rows[i].meta.model != fold.holdout));
    }
    let llama = &result.folds[1];
    assert_eq!(llama.test.len(), 100 + 137);

    // The input table keeps its original spelling.
    assert!(table.rows.iter().any(|r| r.meta.model == "llama-2-7b-hf"));
}

#[test]
fn test_leave_one_workload_out() {
    let table = build_table();
    let folds = leave_one_workload_out(&table);
    let holdouts: Vec<&str> = folds.iter().map(|f| f.holdout.as_str()).collect();
    assert_eq!(holdouts, vec!["codegen", "general", "reasoning"]);
    assert_folds_cover(&folds, table.len());
    assert_eq!(folds[0].test.len(), 100 + 61);
}

#[test]
fn test_leave_one_experiment_out() {
    let table = build_table();
    let folds = leave_one_group_out(&table, GroupKey::Experiment);
    assert_eq!(folds.len(), EXPERIMENTS.len());
    assert_folds_cover(&folds, table.len());
    for (fold, &(id, n)) in folds.iter().zip(EXPERIMENTS) {
        assert_eq!(fold.holdout, id);
        assert_eq!(fold.test.len(), n);
    }
}

#[test]
fn test_splits_on_empty_table() {
    let table = StepTable::default();
    assert_eq!(
        temporal_split(&table, SplitFractions::default(), 0),
        Split::default()
    );
    assert_eq!(random_split(0, SplitFractions::default(), 0), Split::default());
    assert!(leave_one_model_out(&table).folds.is_empty());
}

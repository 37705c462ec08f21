//! Dataset splitting strategies.
//!
//! All strategies return row indices into the [`StepTable`] they were given.
//! Index vectors are sorted ascending.
//!
//! - [`temporal_split`]: per experiment, the earliest steps train, the next
//!   validate, the latest test. Every experiment appears in all three.
//! - [`random_split`]: a seeded shuffle with the same proportions, used to
//!   measure how much a random split leaks.
//! - [`leave_one_group_out`]: one cross-validation fold per model, workload
//!   or experiment.

use crate::dataset::StepTable;
use crate::experiment::normalize_model_name;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Train and validation fractions; the remainder is the test set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitFractions {
    pub train: f64,
    pub valid: f64,
}

impl Default for SplitFractions {
    fn default() -> Self {
        Self {
            train: 0.6,
            valid: 0.2,
        }
    }
}

impl SplitFractions {
    /// Sizes of the train and valid partitions of `n` rows.
    ///
    /// Each is `n * fraction` rounded half to even, clamped so the two never
    /// exceed `n`.
    pub fn boundaries(&self, n: usize) -> (usize, usize) {
        let round = |frac: f64| (n as f64 * frac).round_ties_even().max(0.0) as usize;
        let n_train = round(self.train).min(n);
        let n_valid = round(self.valid).min(n - n_train);
        (n_train, n_valid)
    }
}

/// A train/valid/test partition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub train: Vec<usize>,
    pub valid: Vec<usize>,
    pub test: Vec<usize>,
}

/// One leave-one-group-out fold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fold {
    /// The held-out group value.
    pub holdout: String,
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Column used to group rows for cross-validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKey {
    Model,
    Workload,
    Experiment,
}

impl GroupKey {
    pub fn name(&self) -> &'static str {
        match self {
            GroupKey::Model => "model",
            GroupKey::Workload => "workload",
            GroupKey::Experiment => "experiment_id",
        }
    }
}

/// Row indices per distinct group value, ordered by group value.
pub fn group_indices(table: &StepTable, key: GroupKey) -> BTreeMap<String, Vec<usize>> {
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, row) in table.rows.iter().enumerate() {
        let value = match key {
            GroupKey::Model => &row.meta.model,
            GroupKey::Workload => &row.meta.workload,
            GroupKey::Experiment => &row.record.experiment_id,
        };
        groups.entry(value.clone()).or_default().push(i);
    }
    groups
}

/// Split each experiment chronologically by step id.
///
/// Within every experiment, all train step ids precede all valid step ids,
/// which precede all test step ids. `seed` is accepted for symmetry with the
/// randomized strategies and has no effect.
///
/// Sizes come from [`SplitFractions::boundaries`] per experiment, so very
/// small experiments can leave a partition empty: 3 rows split 2/1/0.
pub fn temporal_split(table: &StepTable, fractions: SplitFractions, _seed: u64) -> Split {
    let mut split = Split::default();

    for (_, mut indices) in group_indices(table, GroupKey::Experiment) {
        // Rows without a step id sort last.
        indices.sort_by_key(|&i| {
            let step_id = table.rows[i].record.step_id;
            (step_id.is_none(), step_id, i)
        });
        let (n_train, n_valid) = fractions.boundaries(indices.len());

        split.train.extend_from_slice(&indices[..n_train]);
        split.valid.extend_from_slice(&indices[n_train..n_train + n_valid]);
        split.test.extend_from_slice(&indices[n_train + n_valid..]);
    }

    split.train.sort_unstable();
    split.valid.sort_unstable();
    split.test.sort_unstable();
    split
}

/// Seeded random split of `n` rows, ignoring groups and order.
///
/// The same seed always yields the same partition.
pub fn random_split(n: usize, fractions: SplitFractions, seed: u64) -> Split {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut perm: Vec<usize> = (0..n).collect();
    perm.shuffle(&mut rng);

    let (n_train, n_valid) = fractions.boundaries(n);
    let mut split = Split {
        train: perm[..n_train].to_vec(),
        valid: perm[n_train..n_train + n_valid].to_vec(),
        test: perm[n_train + n_valid..].to_vec(),
    };
    split.train.sort_unstable();
    split.valid.sort_unstable();
    split.test.sort_unstable();
    split
}

/// One fold per distinct value of `key`, in sorted order of the value.
///
/// Group values are used as they appear in the table; normalize first when
/// variant spellings should be merged.
pub fn leave_one_group_out(table: &StepTable, key: GroupKey) -> Vec<Fold> {
    let groups = group_indices(table, key);
    groups
        .iter()
        .map(|(holdout, test)| {
            let train = groups
                .iter()
                .filter(|(name, _)| *name != holdout)
                .flat_map(|(_, idx)| idx.iter().copied());
            let mut train: Vec<usize> = train.collect();
            train.sort_unstable();
            Fold {
                holdout: holdout.clone(),
                train,
                test: test.clone(),
            }
        })
        .collect()
}

/// A copy of the table with every model name normalized.
pub fn normalize_model_names(table: &StepTable) -> StepTable {
    let mut normalized = table.clone();
    for row in &mut normalized.rows {
        row.meta.model = normalize_model_name(&row.meta.model);
    }
    normalized
}

/// Leave-one-model-out folds together with the normalized table they index.
#[derive(Debug, Clone)]
pub struct ModelFolds {
    /// Input table with normalized model names. Use this one downstream so
    /// fold labels and row models agree.
    pub table: StepTable,
    pub folds: Vec<Fold>,
}

/// One fold per normalized model name.
pub fn leave_one_model_out(table: &StepTable) -> ModelFolds {
    let normalized = normalize_model_names(table);
    let folds = leave_one_group_out(&normalized, GroupKey::Model);
    ModelFolds {
        table: normalized,
        folds,
    }
}

/// One fold per workload.
pub fn leave_one_workload_out(table: &StepTable) -> Vec<Fold> {
    leave_one_group_out(table, GroupKey::Workload)
}

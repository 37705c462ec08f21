//! Sampling-bias characterization.
//!
//! Only a sampled subset of steps is traced. If the sampler behaves
//! pseudo-randomly the gaps between consecutive traced step ids vary; a
//! near-constant gap means periodic sampling, which can bias splits.

use crate::dataset::StepTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Gap standard deviation below which a group counts as periodic.
pub const PERIODIC_GAP_STD: f64 = 0.5;

/// Gap statistics of one experiment's sorted step ids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GapStats {
    /// Number of gaps (traced steps with an id, minus one).
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation; 0 with fewer than two gaps.
    pub std: f64,
    pub min: i64,
    pub max: i64,
}

impl GapStats {
    fn from_step_ids(mut ids: Vec<i64>) -> Self {
        ids.sort_unstable();
        let gaps: Vec<i64> = ids.windows(2).map(|w| w[1] - w[0]).collect();
        if gaps.is_empty() {
            return Self::default();
        }
        let n = gaps.len() as f64;
        let mean = gaps.iter().sum::<i64>() as f64 / n;
        let std = if gaps.len() > 1 {
            let ss: f64 = gaps.iter().map(|&g| (g as f64 - mean).powi(2)).sum();
            (ss / (n - 1.0)).sqrt()
        } else {
            0.0
        };
        Self {
            count: gaps.len(),
            mean,
            std,
            min: gaps.iter().copied().min().unwrap_or(0),
            max: gaps.iter().copied().max().unwrap_or(0),
        }
    }

    /// Whether this group's sampling looks periodic. Needs at least two gaps.
    pub fn is_periodic(&self, threshold: f64) -> bool {
        self.count >= 2 && self.std < threshold
    }
}

/// Sampling characterization of an assembled table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingReport {
    pub total_steps: usize,
    pub per_experiment_counts: BTreeMap<String, usize>,
    pub step_id_gaps: BTreeMap<String, GapStats>,
    /// True if any experiment's gap std is below the threshold.
    pub is_periodic: bool,
    /// Largest over smallest per-experiment row count; 1.0 is uniform.
    pub coverage_ratio: f64,
    /// Coefficient of variation of per-experiment row counts.
    pub coverage_cv: f64,
    pub summary: String,
}

/// Characterize step-id sampling per experiment.
pub fn characterize_sampling(table: &StepTable, periodic_threshold: f64) -> SamplingReport {
    let mut step_ids: BTreeMap<String, Vec<i64>> = BTreeMap::new();
    let mut per_experiment_counts: BTreeMap<String, usize> = BTreeMap::new();
    for row in &table.rows {
        let exp = &row.record.experiment_id;
        *per_experiment_counts.entry(exp.clone()).or_default() += 1;
        let ids = step_ids.entry(exp.clone()).or_default();
        if let Some(id) = row.record.step_id {
            ids.push(id);
        }
    }

    let step_id_gaps: BTreeMap<String, GapStats> = step_ids
        .into_iter()
        .map(|(exp, ids)| (exp, GapStats::from_step_ids(ids)))
        .collect();
    let is_periodic = step_id_gaps
        .values()
        .any(|g| g.is_periodic(periodic_threshold));

    let counts: Vec<f64> = per_experiment_counts.values().map(|&c| c as f64).collect();
    let (min_count, max_count, mean_count, cv) = count_stats(&counts);
    let coverage_ratio = if min_count > 0.0 { max_count / min_count } else { 0.0 };

    let mut summary = Vec::new();
    summary.push(format!(
        "Sampling characterization for {} experiments:",
        per_experiment_counts.len()
    ));
    summary.push(format!("  Total traced steps: {}", table.len()));
    summary.push(format!(
        "  Steps per experiment: min={:.0}, max={:.0}, mean={:.0}",
        min_count, max_count, mean_count
    ));
    summary.push(format!(
        "  Coverage: max/min ratio={:.2}, CV={:.4}",
        coverage_ratio, cv
    ));
    summary.push(format!("  Periodic sampling detected: {}", is_periodic));
    if !step_id_gaps.is_empty() {
        let n = step_id_gaps.len() as f64;
        let mean_of_means = step_id_gaps.values().map(|g| g.mean).sum::<f64>() / n;
        let mean_of_stds = step_id_gaps.values().map(|g| g.std).sum::<f64>() / n;
        summary.push(format!(
            "  Step ID gap (across experiments): mean of means={:.2}, mean of stds={:.2}",
            mean_of_means, mean_of_stds
        ));
    }
    if is_periodic {
        summary.push(format!(
            "  WARNING: At least one experiment shows periodic sampling \
             (gap std < {}). This may introduce systematic bias.",
            periodic_threshold
        ));
    } else {
        summary.push(
            "  Sampling appears random/pseudo-random. No periodic bias detected.".to_string(),
        );
    }

    tracing::info!(
        experiments = per_experiment_counts.len(),
        total_steps = table.len(),
        is_periodic,
        coverage_ratio,
        "sampling characterized"
    );

    SamplingReport {
        total_steps: table.len(),
        per_experiment_counts,
        step_id_gaps,
        is_periodic,
        coverage_ratio,
        coverage_cv: cv,
        summary: summary.join("\n"),
    }
}

/// (min, max, mean, population CV) of the per-experiment counts.
fn count_stats(counts: &[f64]) -> (f64, f64, f64, f64) {
    if counts.is_empty() {
        return (0.0, 0.0, 0.0, 0.0);
    }
    let n = counts.len() as f64;
    let mean = counts.iter().sum::<f64>() / n;
    let min = counts.iter().copied().fold(f64::INFINITY, f64::min);
    let max = counts.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let var = counts.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / n;
    let cv = if mean > 0.0 { var.sqrt() / mean } else { 0.0 };
    (min, max, mean, cv)
}

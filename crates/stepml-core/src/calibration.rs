//! Per-(model, TP) blackbox calibration.
//!
//! The simulator ships one set of blackbox coefficients per model and
//! tensor-parallel degree. This module refits them from the assembled
//! table, one group at a time, and reports how well each fit explains its
//! own training steps.

use crate::dataset::StepTable;
use crate::experiment::normalize_model_name;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use stepml_eval::{
    durations, Baseline, BaselineError, BlackboxBaseline, BlackboxCoefficients, MetricReport,
    StepSample,
};

/// Group key: normalized model name and tensor-parallel degree.
pub type CalibrationKey = (String, u32);

/// Blackbox coefficients fitted on every usable step of one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupCalibration {
    pub model: String,
    pub tp: u32,
    pub coefficients: BlackboxCoefficients,
    /// Rows with complete features and target that the fit used.
    pub n_steps: usize,
    pub n_experiments: usize,
    /// Accuracy on the same rows the coefficients were fitted on.
    pub train: MetricReport,
    /// Contributing experiment ids, sorted.
    pub experiments: Vec<String>,
}

#[derive(Default)]
struct GroupRows {
    samples: Vec<StepSample>,
    experiments: BTreeSet<String>,
}

/// Fit one blackbox baseline per (normalized model, TP) group over all of
/// the group's usable rows.
///
/// Rows missing a feature or the target are ignored; a group left with no
/// usable rows is omitted from the result.
pub fn per_group_coefficients(
    table: &StepTable,
) -> Result<BTreeMap<CalibrationKey, GroupCalibration>, BaselineError> {
    let mut groups: BTreeMap<CalibrationKey, GroupRows> = BTreeMap::new();
    for row in &table.rows {
        let key = (normalize_model_name(&row.meta.model), row.meta.tp);
        let group = groups.entry(key).or_default();
        if let Some(sample) = row.sample() {
            group.samples.push(sample);
            group.experiments.insert(row.record.experiment_id.clone());
        }
    }

    let mut result = BTreeMap::new();
    for ((model, tp), group) in groups {
        if group.samples.is_empty() {
            tracing::warn!(%model, tp, "no usable steps, group not calibrated");
            continue;
        }

        let mut baseline = BlackboxBaseline::new();
        baseline.fit(&group.samples)?;
        let predicted = baseline.predict(&group.samples)?;
        let train = MetricReport::compute(&predicted, &durations(&group.samples));

        tracing::info!(
            %model,
            tp,
            steps = group.samples.len(),
            train_mape = train.mape,
            "group calibrated"
        );

        let calibration = GroupCalibration {
            model: model.clone(),
            tp,
            coefficients: baseline.coefficients()?,
            n_steps: group.samples.len(),
            n_experiments: group.experiments.len(),
            train,
            experiments: group.experiments.into_iter().collect(),
        };
        result.insert((model, tp), calibration);
    }
    Ok(result)
}

//! Trait definitions shared by metrics and baselines.
//!
//! Metrics implement [`Metric`] so that any of them can be plugged into the
//! bootstrap driver. Step-time predictors implement [`Baseline`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One training or evaluation row as seen by the evaluation crate.
///
/// This is the evaluation crate's view of a traced step: only the batch
/// features the closed-form step-time model uses, plus the measured target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepSample {
    /// Prompt tokens processed in the step's batch.
    pub prefill_tokens: f64,
    /// Decode tokens processed in the step's batch.
    pub decode_tokens: f64,
    /// Measured step duration in microseconds.
    pub duration_us: f64,
}

impl StepSample {
    pub fn new(prefill_tokens: f64, decode_tokens: f64, duration_us: f64) -> Self {
        Self {
            prefill_tokens,
            decode_tokens,
            duration_us,
        }
    }
}

/// Extract the target column from a slice of samples.
pub fn durations(samples: &[StepSample]) -> Vec<f64> {
    samples.iter().map(|s| s.duration_us).collect()
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BaselineError {
    #[error("{0}: predict() called before fit()")]
    NotFitted(&'static str),
    #[error("{0}: cannot fit on an empty training set")]
    EmptyTrainingSet(&'static str),
    #[error("Unknown baseline: {0}")]
    UnknownBaseline(String),
}

/// An accuracy metric over predicted/actual sequences of equal length.
pub trait Metric {
    /// Short identifier used in reports.
    fn name(&self) -> &str;

    /// Compute the metric. Percentage metrics return 10.0 for 10%.
    fn compute(&self, predicted: &[f64], actual: &[f64]) -> f64;
}

/// A step-time predictor that can be retrained and evaluated.
///
/// Both built-in baselines implement this, so external models can be
/// compared against them through [`crate::report::baseline_report`].
pub trait Baseline {
    /// Fit on the training rows, replacing any previous fit.
    fn fit(&mut self, train: &[StepSample]) -> Result<(), BaselineError>;

    /// Predict `duration_us` for each row.
    fn predict(&self, rows: &[StepSample]) -> Result<Vec<f64>, BaselineError>;

    /// Human-readable name for reports.
    fn name(&self) -> &str;
}

//! Naive-mean baseline.
//!
//! Predicts the training-set mean duration for every row, ignoring the
//! batch features entirely. Any useful predictor must beat it.

use crate::traits::{Baseline, BaselineError, StepSample};

const NAME: &str = "naive_mean";

/// Always predicts the mean training duration.
#[derive(Debug, Clone, Default)]
pub struct NaiveMeanBaseline {
    mean: Option<f64>,
}

impl NaiveMeanBaseline {
    pub fn new() -> Self {
        Self { mean: None }
    }

    /// The fitted mean, if any.
    pub fn mean(&self) -> Option<f64> {
        self.mean
    }
}

impl Baseline for NaiveMeanBaseline {
    fn fit(&mut self, train: &[StepSample]) -> Result<(), BaselineError> {
        if train.is_empty() {
            return Err(BaselineError::EmptyTrainingSet(NAME));
        }
        let sum: f64 = train.iter().map(|s| s.duration_us).sum();
        self.mean = Some(sum / train.len() as f64);
        Ok(())
    }

    fn predict(&self, rows: &[StepSample]) -> Result<Vec<f64>, BaselineError> {
        let mean = self.mean.ok_or(BaselineError::NotFitted(NAME))?;
        Ok(vec![mean; rows.len()])
    }

    fn name(&self) -> &str {
        NAME
    }
}

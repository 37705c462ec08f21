//! Accuracy metrics for predicted vs. measured step durations.
//!
//! Pure functions over two equal-length sequences. All percentage values are
//! returned as floats where 10.0 means 10%. The four percentage metrics share
//! one policy for `actual == 0`: those rows are excluded, and an empty
//! remainder yields 0.0.

use crate::traits::Metric;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;

fn check_lengths(predicted: &[f64], actual: &[f64]) {
    assert_eq!(
        predicted.len(),
        actual.len(),
        "predicted and actual must have equal length"
    );
}

/// Relative errors `(p - a) / a` over rows with a non-zero actual.
fn relative_errors(predicted: &[f64], actual: &[f64]) -> Vec<f64> {
    check_lengths(predicted, actual);
    predicted
        .iter()
        .zip(actual)
        .filter(|&(_, &a)| a != 0.0)
        .map(|(&p, &a)| (p - a) / a)
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Mean absolute percentage error.
pub fn mape(predicted: &[f64], actual: &[f64]) -> f64 {
    let errors: Vec<f64> = relative_errors(predicted, actual)
        .into_iter()
        .map(f64::abs)
        .collect();
    mean(&errors) * 100.0
}

/// Mean signed percentage error. Positive means systematic overestimation.
pub fn mspe(predicted: &[f64], actual: &[f64]) -> f64 {
    mean(&relative_errors(predicted, actual)) * 100.0
}

/// Pearson correlation coefficient.
///
/// Returns NaN when either input is constant or has fewer than two points;
/// callers decide how to treat "no useful correlation".
pub fn pearson_r(predicted: &[f64], actual: &[f64]) -> f64 {
    check_lengths(predicted, actual);
    let n = predicted.len();
    if n < 2 {
        return f64::NAN;
    }
    let mean_p = mean(predicted);
    let mean_a = mean(actual);

    let mut cov = 0.0;
    let mut var_p = 0.0;
    let mut var_a = 0.0;
    for (&p, &a) in predicted.iter().zip(actual) {
        let dp = p - mean_p;
        let da = a - mean_a;
        cov += dp * da;
        var_p += dp * dp;
        var_a += da * da;
    }
    if var_p == 0.0 || var_a == 0.0 {
        return f64::NAN;
    }
    (cov / (var_p * var_a).sqrt()).clamp(-1.0, 1.0)
}

/// 99th percentile of absolute percentage errors.
pub fn p99_error(predicted: &[f64], actual: &[f64]) -> f64 {
    let errors: Vec<f64> = relative_errors(predicted, actual)
        .into_iter()
        .map(|e| e.abs() * 100.0)
        .collect();
    if errors.is_empty() {
        return 0.0;
    }
    percentile(&errors, 99.0)
}

/// Percentile with linear interpolation between closest ranks.
///
/// `p` is in [0, 100]. NaN values are ignored; an empty input yields NaN.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(f64::total_cmp);
    percentile_sorted(&sorted, p)
}

fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Mean absolute percentage error.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mape;

/// Mean signed percentage error.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mspe;

/// Pearson correlation coefficient.
#[derive(Debug, Clone, Copy, Default)]
pub struct PearsonR;

/// 99th percentile absolute percentage error.
#[derive(Debug, Clone, Copy, Default)]
pub struct P99Error;

impl Metric for Mape {
    fn name(&self) -> &str {
        "mape"
    }
    fn compute(&self, predicted: &[f64], actual: &[f64]) -> f64 {
        mape(predicted, actual)
    }
}

impl Metric for Mspe {
    fn name(&self) -> &str {
        "mspe"
    }
    fn compute(&self, predicted: &[f64], actual: &[f64]) -> f64 {
        mspe(predicted, actual)
    }
}

impl Metric for PearsonR {
    fn name(&self) -> &str {
        "pearson_r"
    }
    fn compute(&self, predicted: &[f64], actual: &[f64]) -> f64 {
        pearson_r(predicted, actual)
    }
}

impl Metric for P99Error {
    fn name(&self) -> &str {
        "p99_error"
    }
    fn compute(&self, predicted: &[f64], actual: &[f64]) -> f64 {
        p99_error(predicted, actual)
    }
}

/// Bootstrap resampling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    pub n_resamples: usize,
    /// Confidence level, e.g. 0.95 for a 95% interval.
    pub confidence: f64,
    pub seed: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            n_resamples: 1000,
            confidence: 0.95,
            seed: 42,
        }
    }
}

/// Bootstrap confidence interval for any metric.
///
/// Resamples (predicted, actual) pairs with replacement, recomputes the
/// metric for each resample and returns the `(lower, upper)` percentile
/// bounds. Resamples whose metric is NaN (e.g. a constant resample under
/// [`PearsonR`]) do not contribute to the bounds.
pub fn bootstrap_ci(
    metric: &dyn Metric,
    predicted: &[f64],
    actual: &[f64],
    config: &BootstrapConfig,
) -> (f64, f64) {
    check_lengths(predicted, actual);
    let n = predicted.len();
    if n == 0 || config.n_resamples == 0 {
        let v = metric.compute(predicted, actual);
        return (v, v);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut sample_p = vec![0.0; n];
    let mut sample_a = vec![0.0; n];
    let mut estimates = Vec::with_capacity(config.n_resamples);

    for _ in 0..config.n_resamples {
        for (p, a) in sample_p.iter_mut().zip(sample_a.iter_mut()) {
            let idx = rng.gen_range(0..n);
            *p = predicted[idx];
            *a = actual[idx];
        }
        estimates.push(metric.compute(&sample_p, &sample_a));
    }

    let alpha = 1.0 - config.confidence;
    let lower = percentile(&estimates, 100.0 * alpha / 2.0);
    let upper = percentile(&estimates, 100.0 * (1.0 - alpha / 2.0));
    (lower, upper)
}

/// Workload-level end-to-end mean error.
///
/// For every request present in both maps, sums the predicted step times
/// and compares the mean predicted end-to-end time against the mean actual
/// one, as a signed percentage. Returns 0.0 when no request is common to
/// both inputs or the mean actual time is zero.
pub fn e2e_mean_error<K>(
    predicted_step_times: &HashMap<K, Vec<f64>>,
    actual_e2e_times: &HashMap<K, f64>,
) -> f64
where
    K: Eq + Hash + Ord,
{
    let mut common: Vec<&K> = predicted_step_times
        .keys()
        .filter(|k| actual_e2e_times.contains_key(*k))
        .collect();
    if common.is_empty() {
        return 0.0;
    }
    common.sort();

    let predicted: Vec<f64> = common
        .iter()
        .map(|k| predicted_step_times[*k].iter().sum())
        .collect();
    let actual: Vec<f64> = common.iter().map(|k| actual_e2e_times[*k]).collect();

    let mean_actual = mean(&actual);
    if mean_actual == 0.0 {
        return 0.0;
    }
    (mean(&predicted) - mean_actual) / mean_actual * 100.0
}

/// The standard set of accuracy metrics for one predictor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricReport {
    pub mape: f64,
    pub mspe: f64,
    /// Pearson r, with NaN (constant predictions) reported as 0.0.
    pub pearson_r: f64,
    pub p99_error: f64,
}

impl MetricReport {
    pub fn compute(predicted: &[f64], actual: &[f64]) -> Self {
        let r = pearson_r(predicted, actual);
        Self {
            mape: mape(predicted, actual),
            mspe: mspe(predicted, actual),
            pearson_r: if r.is_nan() { 0.0 } else { r },
            p99_error: p99_error(predicted, actual),
        }
    }
}

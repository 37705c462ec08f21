//! Evaluation metrics and baselines for StepML step-time models.
//!
//! This crate provides the [`Metric`] and [`Baseline`] traits, the metric
//! library every research idea is scored with, and the two reference
//! predictors any proposed model must beat:
//!
//! | Baseline | Model | Purpose |
//! |----------|-------|---------|
//! | [`BlackboxBaseline`] | `beta0 + beta1*prefill + beta2*decode`, non-negative | Simulator's current model |
//! | [`NaiveMeanBaseline`] | Training-set mean | Floor every model must beat |
//!
//! | Metric | Definition |
//! |--------|------------|
//! | [`Mape`] | Mean absolute percentage error, zero actuals skipped |
//! | [`Mspe`] | Mean signed percentage error, positive = overpredict |
//! | [`PearsonR`] | Linear correlation of predicted vs actual |
//! | [`P99Error`] | 99th percentile of absolute percentage error |

pub mod blackbox;
pub mod metrics;
pub mod naive_mean;
pub mod report;
pub mod traits;

pub use blackbox::{BlackboxBaseline, BlackboxCoefficients};
pub use metrics::{
    bootstrap_ci, e2e_mean_error, mape, mspe, p99_error, pearson_r, percentile, BootstrapConfig,
    Mape, MetricReport, Mspe, P99Error, PearsonR,
};
pub use naive_mean::NaiveMeanBaseline;
pub use report::{
    baseline_report, e2e_sufficiency_gate, format_report_table, short_circuit_threshold,
    step_time_error, GateResult, StepTimeError,
};
pub use traits::*;

/// Create a metric by name.
pub fn metric_by_name(name: &str) -> Option<Box<dyn Metric>> {
    match name {
        "mape" => Some(Box::new(Mape)),
        "mspe" => Some(Box::new(Mspe)),
        "pearson_r" => Some(Box::new(PearsonR)),
        "p99_error" => Some(Box::new(P99Error)),
        _ => None,
    }
}

/// List all available metric names.
pub fn available_metrics() -> Vec<&'static str> {
    vec!["mape", "mspe", "pearson_r", "p99_error"]
}

/// Create an unfitted baseline by name.
pub fn baseline_by_name(name: &str) -> Result<Box<dyn Baseline>, BaselineError> {
    match name {
        "blackbox" => Ok(Box::new(BlackboxBaseline::new())),
        "naive_mean" => Ok(Box::new(NaiveMeanBaseline::new())),
        other => Err(BaselineError::UnknownBaseline(other.to_string())),
    }
}

/// List all available baseline names.
pub fn available_baselines() -> Vec<&'static str> {
    vec!["blackbox", "naive_mean"]
}

/// One unfitted instance of every built-in baseline.
pub fn default_baselines() -> Vec<Box<dyn Baseline>> {
    vec![
        Box::new(BlackboxBaseline::new()),
        Box::new(NaiveMeanBaseline::new()),
    ]
}

//! Baseline reports and research gates.

use crate::blackbox::BlackboxCoefficients;
use crate::metrics::MetricReport;
use crate::traits::{durations, Baseline, BaselineError, StepSample};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fit every baseline on `train`, predict `test`, and compute the standard
/// metric set for each, keyed by baseline name.
pub fn baseline_report(
    train: &[StepSample],
    test: &[StepSample],
    baselines: &mut [Box<dyn Baseline>],
) -> Result<BTreeMap<String, MetricReport>, BaselineError> {
    let actual = durations(test);
    let mut report = BTreeMap::new();

    for model in baselines.iter_mut() {
        model.fit(train)?;
        let predicted = model.predict(test)?;
        let metrics = MetricReport::compute(&predicted, &actual);
        tracing::info!(
            baseline = model.name(),
            mape = metrics.mape,
            mspe = metrics.mspe,
            "baseline evaluated"
        );
        report.insert(model.name().to_string(), metrics);
    }
    Ok(report)
}

/// MAPE an improved model must get under to be worth pursuing further.
///
/// If the blackbox MAPE exceeds 25%, the threshold is blackbox MAPE + 10;
/// otherwise it is 35 (25 plus the same 10-point buffer).
pub fn short_circuit_threshold(blackbox_mape: f64) -> f64 {
    if blackbox_mape > 25.0 {
        blackbox_mape + 10.0
    } else {
        35.0
    }
}

/// Outcome of a pass/fail research gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub passed: bool,
    pub value: f64,
    pub message: String,
}

/// Flag when the blackbox end-to-end error is already within
/// `threshold_pp` percentage points, meaning additional step-level
/// modelling needs separate justification. `passed == false` means flagged.
pub fn e2e_sufficiency_gate(blackbox_e2e_error: f64, threshold_pp: f64) -> GateResult {
    let flagged = blackbox_e2e_error.abs() < threshold_pp;
    let message = if flagged {
        format!(
            "E2E sufficiency gate FLAGGED: blackbox E2E mean error = {:.1}% \
             (|error| < {:.0}%). Blackbox may already be sufficient; \
             review justification before proceeding.",
            blackbox_e2e_error, threshold_pp
        )
    } else {
        format!(
            "E2E sufficiency gate passed: blackbox E2E mean error = {:.1}% \
             (|error| >= {:.0}%). Step-level improvement is justified.",
            blackbox_e2e_error, threshold_pp
        )
    };
    GateResult {
        passed: !flagged,
        value: blackbox_e2e_error,
        message,
    }
}

/// Step-time prediction error of a fixed blackbox model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepTimeError {
    pub metrics: MetricReport,
    pub mean_predicted: f64,
    pub mean_actual: f64,
    pub total_predicted: f64,
    pub total_actual: f64,
}

/// Evaluate fixed blackbox coefficients against measured step durations.
pub fn step_time_error(samples: &[StepSample], coeffs: &BlackboxCoefficients) -> StepTimeError {
    let predicted: Vec<f64> = samples
        .iter()
        .map(|s| coeffs.step_time(s.prefill_tokens, s.decode_tokens))
        .collect();
    let actual = durations(samples);

    let total_predicted: f64 = predicted.iter().sum();
    let total_actual: f64 = actual.iter().sum();
    let n = samples.len().max(1) as f64;

    StepTimeError {
        metrics: MetricReport::compute(&predicted, &actual),
        mean_predicted: total_predicted / n,
        mean_actual: total_actual / n,
        total_predicted,
        total_actual,
    }
}

/// Format a baseline report as a comparison table, optionally with
/// bootstrap MAPE intervals per baseline.
pub fn format_report_table(
    report: &BTreeMap<String, MetricReport>,
    mape_ci: &BTreeMap<String, (f64, f64)>,
) -> String {
    if report.is_empty() {
        return String::from("No baselines evaluated.\n");
    }

    let mut out = String::new();
    out.push_str(&format!("\n{:=<86}\n", "  Baseline Comparison  "));
    out.push_str(&format!(
        "{:<14} {:>9} {:>20} {:>9} {:>10} {:>10}\n",
        "Baseline", "MAPE %", "MAPE 95% CI", "MSPE %", "Pearson r", "P99 %"
    ));
    out.push_str(&format!("{:-<86}\n", ""));

    for (name, m) in report {
        let ci = mape_ci
            .get(name)
            .map(|(lo, hi)| format!("[{:.1}, {:.1}]", lo, hi))
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:<14} {:>9.2} {:>20} {:>+9.2} {:>10.4} {:>10.2}\n",
            name, m.mape, ci, m.mspe, m.pearson_r, m.p99_error,
        ));
    }
    out.push_str(&format!("{:=<86}\n", ""));
    out
}

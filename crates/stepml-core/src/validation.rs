//! Split-effectiveness and proxy validators.

use crate::dataset::StepTable;
use crate::lifecycle::LifecycleRecord;
use crate::splits::{random_split, temporal_split, Split, SplitFractions};
use serde::{Deserialize, Serialize};
use stepml_eval::{durations, mape, pearson_r, Baseline, BaselineError, BlackboxBaseline};

/// Gap in percentage points above which leakage is considered confirmed.
pub const LEAKAGE_GAP_PP: f64 = 5.0;

/// Correlation at or above which total tokens are a usable KV-length proxy.
pub const PROGRESS_INDEX_MIN_R: f64 = 0.9;

/// Temporal vs random split comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeakageReport {
    pub temporal_mape: f64,
    pub random_mape: f64,
    /// `temporal_mape - random_mape`; positive means the temporal split is harder.
    pub gap: f64,
    pub leakage_confirmed: bool,
    pub conclusion: String,
}

fn blackbox_test_mape(table: &StepTable, split: &Split) -> Result<f64, BaselineError> {
    let train = table.samples(&split.train);
    let test = table.samples(&split.test);
    let mut model = BlackboxBaseline::new();
    model.fit(&train)?;
    let predicted = model.predict(&test)?;
    Ok(mape(&predicted, &durations(&test)))
}

/// Fit the blackbox baseline under a temporal split and under a seeded
/// random split with the same fractions, and compare test MAPE.
///
/// Adjacent steps are autocorrelated, so a random split lets near-duplicates
/// of test rows into training. A gap above `gap_threshold_pp` confirms the
/// temporal split is needed.
pub fn temporal_vs_random_split(
    table: &StepTable,
    fractions: SplitFractions,
    seed: u64,
    gap_threshold_pp: f64,
) -> Result<LeakageReport, BaselineError> {
    let temporal = temporal_split(table, fractions, seed);
    let random = random_split(table.len(), fractions, seed);

    let temporal_mape = blackbox_test_mape(table, &temporal)?;
    let random_mape = blackbox_test_mape(table, &random)?;
    let gap = temporal_mape - random_mape;
    let leakage_confirmed = gap > gap_threshold_pp;

    let conclusion = if leakage_confirmed {
        format!(
            "Temporal split MAPE ({:.1}%) is {:.1}pp higher than random split MAPE ({:.1}%). \
             This confirms temporal splitting prevents autocorrelation leakage: random \
             splitting lets correlated adjacent steps leak between train and test.",
            temporal_mape, gap, random_mape
        )
    } else if gap > 0.0 {
        format!(
            "Temporal split MAPE ({:.1}%) is {:.1}pp higher than random split MAPE ({:.1}%). \
             Small gap suggests mild autocorrelation in the data.",
            temporal_mape, gap, random_mape
        )
    } else {
        format!(
            "Temporal split MAPE ({:.1}%) is not higher than random split MAPE ({:.1}%). \
             No evidence of autocorrelation leakage in this dataset.",
            temporal_mape, random_mape
        )
    };

    tracing::info!(temporal_mape, random_mape, gap, leakage_confirmed, "leakage check complete");

    Ok(LeakageReport {
        temporal_mape,
        random_mape,
        gap,
        leakage_confirmed,
        conclusion,
    })
}

/// Total tokens as a KV-length proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressIndexReport {
    /// Pearson r between total tokens and end-to-end time; NaN if undefined.
    pub correlation: f64,
    pub n_requests: usize,
    pub passed: bool,
    pub conclusion: String,
}

/// Check that `input_tokens + output_tokens` tracks request end-to-end time.
///
/// Informational: a failure is reported, never raised.
pub fn validate_progress_index(lifecycle: &[LifecycleRecord], min_r: f64) -> ProgressIndexReport {
    let total_tokens: Vec<f64> = lifecycle.iter().map(|r| r.total_tokens() as f64).collect();
    let e2e: Vec<f64> = lifecycle.iter().map(LifecycleRecord::e2e_seconds).collect();
    let n_requests = lifecycle.len();

    let correlation = pearson_r(&total_tokens, &e2e);
    let passed = correlation >= min_r;

    let conclusion = if passed {
        format!(
            "ProgressIndex proxy validated: Pearson r = {:.3} (n={}). Total tokens \
             correlate strongly with E2E time.",
            correlation, n_requests
        )
    } else {
        format!(
            "ProgressIndex flag: correlation is {:.3} (n={}), below the {} threshold. \
             Total tokens are a weak proxy for E2E time in this dataset. \
             Informational only.",
            correlation, n_requests, min_r
        )
    };

    if passed {
        tracing::info!(correlation, n_requests, "progress index gate passed");
    } else {
        tracing::warn!(correlation, n_requests, "progress index gate flagged");
    }

    ProgressIndexReport {
        correlation,
        n_requests,
        passed,
        conclusion,
    }
}

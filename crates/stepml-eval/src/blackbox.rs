//! Retrainable blackbox step-time baseline.
//!
//! Mirrors the simulator's closed-form step-time model:
//!
//! ```text
//! duration_us = beta0 + beta1 * prefill_tokens + beta2 * decode_tokens
//! ```
//!
//! All three coefficients are constrained to be non-negative. The intercept
//! is modelled as a column of ones so the constraint applies uniformly.
//! Columns are L2-normalized before solving so the ones column (~1) and the
//! token columns (~thousands) are on a comparable scale, then coefficients
//! are rescaled back to original units.

use crate::traits::{Baseline, BaselineError, StepSample};
use serde::{Deserialize, Serialize};

const NAME: &str = "blackbox";
const NUM_COLS: usize = 3;

/// Fitted coefficients of the blackbox model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlackboxCoefficients {
    /// Intercept in microseconds.
    pub beta0: f64,
    /// Cost per prefill token.
    pub beta1: f64,
    /// Cost per decode token.
    pub beta2: f64,
}

impl BlackboxCoefficients {
    pub fn step_time(&self, prefill_tokens: f64, decode_tokens: f64) -> f64 {
        self.beta0 + self.beta1 * prefill_tokens + self.beta2 * decode_tokens
    }
}

/// Non-negative 3-coefficient linear regression on batch token counts.
#[derive(Debug, Clone, Default)]
pub struct BlackboxBaseline {
    coeffs: Option<BlackboxCoefficients>,
}

impl BlackboxBaseline {
    pub fn new() -> Self {
        Self { coeffs: None }
    }

    /// A baseline that predicts with fixed coefficients, e.g. the values the
    /// simulator ships with, without fitting.
    pub fn from_coefficients(coeffs: BlackboxCoefficients) -> Self {
        Self {
            coeffs: Some(coeffs),
        }
    }

    /// Fitted coefficients.
    pub fn coefficients(&self) -> Result<BlackboxCoefficients, BaselineError> {
        self.coeffs.ok_or(BaselineError::NotFitted(NAME))
    }
}

impl Baseline for BlackboxBaseline {
    fn fit(&mut self, train: &[StepSample]) -> Result<(), BaselineError> {
        if train.is_empty() {
            return Err(BaselineError::EmptyTrainingSet(NAME));
        }

        let row = |s: &StepSample| [1.0, s.prefill_tokens, s.decode_tokens];

        let mut norms = [0.0f64; NUM_COLS];
        for s in train {
            for (n, v) in norms.iter_mut().zip(row(s)) {
                *n += v * v;
            }
        }
        for n in norms.iter_mut() {
            *n = n.sqrt();
            if *n == 0.0 {
                *n = 1.0;
            }
        }

        // Gram matrix and right-hand side of the normalized problem.
        let mut gram = [[0.0f64; NUM_COLS]; NUM_COLS];
        let mut rhs = [0.0f64; NUM_COLS];
        let mut yty = 0.0;
        for s in train {
            let a = row(s);
            let y = s.duration_us;
            yty += y * y;
            for i in 0..NUM_COLS {
                let ai = a[i] / norms[i];
                rhs[i] += ai * y;
                for j in 0..NUM_COLS {
                    gram[i][j] += ai * a[j] / norms[j];
                }
            }
        }

        let x = nnls_small(&gram, &rhs, yty);
        let coeffs = BlackboxCoefficients {
            beta0: x[0] / norms[0],
            beta1: x[1] / norms[1],
            beta2: x[2] / norms[2],
        };
        tracing::debug!(
            beta0 = coeffs.beta0,
            beta1 = coeffs.beta1,
            beta2 = coeffs.beta2,
            rows = train.len(),
            "blackbox baseline fitted"
        );
        self.coeffs = Some(coeffs);
        Ok(())
    }

    fn predict(&self, rows: &[StepSample]) -> Result<Vec<f64>, BaselineError> {
        let c = self.coefficients()?;
        Ok(rows
            .iter()
            .map(|s| c.step_time(s.prefill_tokens, s.decode_tokens))
            .collect())
    }

    fn name(&self) -> &str {
        NAME
    }
}

/// Exact non-negative least squares for a 3-column problem given in normal
/// form (`gram = AᵀA`, `rhs = Aᵀy`, `yty = yᵀy`).
///
/// The NNLS optimum is the unconstrained least-squares solution on its own
/// support, so it is found by solving every support subset and keeping the
/// feasible solution with the smallest residual.
fn nnls_small(
    gram: &[[f64; NUM_COLS]; NUM_COLS],
    rhs: &[f64; NUM_COLS],
    yty: f64,
) -> [f64; NUM_COLS] {
    let mut best = [0.0; NUM_COLS];
    let mut best_rss = yty;

    for mask in 1u8..(1 << NUM_COLS) {
        let support: Vec<usize> = (0..NUM_COLS).filter(|i| mask & (1 << i) != 0).collect();
        let Some(sub) = solve_subsystem(gram, rhs, &support) else {
            continue;
        };
        if sub.iter().any(|&v| v < 0.0 || !v.is_finite()) {
            continue;
        }

        let mut x = [0.0; NUM_COLS];
        for (&col, &v) in support.iter().zip(&sub) {
            x[col] = v;
        }
        let rss = residual_sum_of_squares(gram, rhs, yty, &x);
        if rss < best_rss {
            best_rss = rss;
            best = x;
        }
    }
    best
}

fn residual_sum_of_squares(
    gram: &[[f64; NUM_COLS]; NUM_COLS],
    rhs: &[f64; NUM_COLS],
    yty: f64,
    x: &[f64; NUM_COLS],
) -> f64 {
    let mut xgx = 0.0;
    let mut xb = 0.0;
    for i in 0..NUM_COLS {
        xb += x[i] * rhs[i];
        for j in 0..NUM_COLS {
            xgx += x[i] * gram[i][j] * x[j];
        }
    }
    yty - 2.0 * xb + xgx
}

/// Solve the normal equations restricted to `support` by Gaussian
/// elimination with partial pivoting. Returns `None` when singular.
fn solve_subsystem(
    gram: &[[f64; NUM_COLS]; NUM_COLS],
    rhs: &[f64; NUM_COLS],
    support: &[usize],
) -> Option<Vec<f64>> {
    let k = support.len();
    let mut m: Vec<Vec<f64>> = support
        .iter()
        .map(|&i| {
            let mut r: Vec<f64> = support.iter().map(|&j| gram[i][j]).collect();
            r.push(rhs[i]);
            r
        })
        .collect();

    let scale = support.iter().map(|&i| gram[i][i].abs()).fold(0.0, f64::max);
    let eps = 1e-12 * scale.max(1.0);

    for col in 0..k {
        let pivot = (col..k).max_by(|&a, &b| m[a][col].abs().total_cmp(&m[b][col].abs()))?;
        if m[pivot][col].abs() <= eps {
            return None;
        }
        m.swap(col, pivot);
        for r in (col + 1)..k {
            let f = m[r][col] / m[col][col];
            for c in col..=k {
                m[r][c] -= f * m[col][c];
            }
        }
    }

    let mut x = vec![0.0; k];
    for r in (0..k).rev() {
        let tail: f64 = ((r + 1)..k).map(|c| m[r][c] * x[c]).sum();
        x[r] = (m[r][k] - tail) / m[r][r];
    }
    Some(x)
}

//! TOML configuration parsing for StepML runs.
//!
//! Every section and field has a default, so an empty file is a valid
//! configuration that reproduces the standard 60/20/20 evaluation setup.

use crate::dataset::DatasetLayout;
use crate::lifecycle::LIFECYCLE_FILE;
use crate::sampling::PERIODIC_GAP_STD;
use crate::splits::SplitFractions;
use crate::trace::{BATCH_SUMMARY_EVENT, TRACE_FILE};
use crate::validation::{LEAKAGE_GAP_PP, PROGRESS_INDEX_MIN_R};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use stepml_eval::BootstrapConfig;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepMlConfig {
    #[serde(default)]
    pub dataset: DatasetSection,
    #[serde(default)]
    pub split: SplitSection,
    #[serde(default)]
    pub evaluation: EvaluationSection,
    #[serde(default)]
    pub gates: GatesSection,
}

/// Where experiments live and how they are laid out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSection {
    /// Directory holding one subdirectory per experiment.
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    #[serde(default = "default_trace_file")]
    pub trace_file: PathBuf,
    #[serde(default = "default_lifecycle_file")]
    pub lifecycle_file: PathBuf,
    #[serde(default = "default_batch_summary_event")]
    pub batch_summary_event: String,
}

fn default_data_root() -> PathBuf {
    PathBuf::from("eval/ground_truth")
}
fn default_trace_file() -> PathBuf {
    PathBuf::from(TRACE_FILE)
}
fn default_lifecycle_file() -> PathBuf {
    PathBuf::from(LIFECYCLE_FILE)
}
fn default_batch_summary_event() -> String {
    BATCH_SUMMARY_EVENT.to_string()
}

impl Default for DatasetSection {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            trace_file: default_trace_file(),
            lifecycle_file: default_lifecycle_file(),
            batch_summary_event: default_batch_summary_event(),
        }
    }
}

impl From<DatasetSection> for DatasetLayout {
    fn from(s: DatasetSection) -> Self {
        DatasetLayout {
            trace_file: s.trace_file,
            lifecycle_file: s.lifecycle_file,
            batch_summary_event: s.batch_summary_event,
        }
    }
}

/// Split proportions and seed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitSection {
    #[serde(default = "default_train_frac")]
    pub train_frac: f64,
    #[serde(default = "default_valid_frac")]
    pub valid_frac: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_train_frac() -> f64 {
    0.6
}
fn default_valid_frac() -> f64 {
    0.2
}
fn default_seed() -> u64 {
    42
}

impl Default for SplitSection {
    fn default() -> Self {
        Self {
            train_frac: default_train_frac(),
            valid_frac: default_valid_frac(),
            seed: default_seed(),
        }
    }
}

impl From<&SplitSection> for SplitFractions {
    fn from(s: &SplitSection) -> Self {
        SplitFractions {
            train: s.train_frac,
            valid: s.valid_frac,
        }
    }
}

/// Bootstrap parameters for metric confidence intervals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSection {
    #[serde(default = "default_bootstrap_resamples")]
    pub bootstrap_resamples: usize,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_bootstrap_resamples() -> usize {
    1000
}
fn default_confidence() -> f64 {
    0.95
}

impl Default for EvaluationSection {
    fn default() -> Self {
        Self {
            bootstrap_resamples: default_bootstrap_resamples(),
            confidence: default_confidence(),
            seed: default_seed(),
        }
    }
}

impl From<&EvaluationSection> for BootstrapConfig {
    fn from(s: &EvaluationSection) -> Self {
        BootstrapConfig {
            n_resamples: s.bootstrap_resamples,
            confidence: s.confidence,
            seed: s.seed,
        }
    }
}

/// Thresholds of the diagnostic gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatesSection {
    #[serde(default = "default_periodic_gap_std")]
    pub periodic_gap_std: f64,
    #[serde(default = "default_leakage_gap_pp")]
    pub leakage_gap_pp: f64,
    #[serde(default = "default_progress_index_min_r")]
    pub progress_index_min_r: f64,
    #[serde(default = "default_e2e_sufficiency_pp")]
    pub e2e_sufficiency_pp: f64,
}

fn default_periodic_gap_std() -> f64 {
    PERIODIC_GAP_STD
}
fn default_leakage_gap_pp() -> f64 {
    LEAKAGE_GAP_PP
}
fn default_progress_index_min_r() -> f64 {
    PROGRESS_INDEX_MIN_R
}
fn default_e2e_sufficiency_pp() -> f64 {
    12.0
}

impl Default for GatesSection {
    fn default() -> Self {
        Self {
            periodic_gap_std: default_periodic_gap_std(),
            leakage_gap_pp: default_leakage_gap_pp(),
            progress_index_min_r: default_progress_index_min_r(),
            e2e_sufficiency_pp: default_e2e_sufficiency_pp(),
        }
    }
}

impl StepMlConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        let config: StepMlConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration consistency.
    fn validate(&self) -> Result<(), ConfigError> {
        let split = &self.split;
        for (name, frac) in [("train_frac", split.train_frac), ("valid_frac", split.valid_frac)] {
            if !(frac > 0.0 && frac <= 1.0) {
                return Err(ConfigError::Validation(format!(
                    "{} must be in (0, 1], got {}",
                    name, frac
                )));
            }
        }
        if split.train_frac + split.valid_frac >= 1.0 {
            return Err(ConfigError::Validation(format!(
                "train_frac ({}) + valid_frac ({}) must leave room for a test set",
                split.train_frac, split.valid_frac
            )));
        }
        if self.evaluation.bootstrap_resamples == 0 {
            return Err(ConfigError::Validation(
                "bootstrap_resamples must be > 0".to_string(),
            ));
        }
        let confidence = self.evaluation.confidence;
        if !(confidence > 0.0 && confidence < 1.0) {
            return Err(ConfigError::Validation(format!(
                "confidence must be in (0, 1), got {}",
                confidence
            )));
        }
        let gates = &self.gates;
        for (name, value) in [
            ("periodic_gap_std", gates.periodic_gap_std),
            ("leakage_gap_pp", gates.leakage_gap_pp),
            ("progress_index_min_r", gates.progress_index_min_r),
            ("e2e_sufficiency_pp", gates.e2e_sufficiency_pp),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Validation(format!(
                    "{} must be finite and >= 0, got {}",
                    name, value
                )));
            }
        }
        if self.dataset.batch_summary_event.is_empty() {
            return Err(ConfigError::Validation(
                "batch_summary_event must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Directory layout of each experiment.
    pub fn layout(&self) -> DatasetLayout {
        self.dataset.clone().into()
    }

    pub fn fractions(&self) -> SplitFractions {
        (&self.split).into()
    }

    pub fn bootstrap(&self) -> BootstrapConfig {
        (&self.evaluation).into()
    }
}

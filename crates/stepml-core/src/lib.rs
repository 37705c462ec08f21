//! StepML — leakage-safe ground-truth dataset for simulator step-time models.
//!
//! This crate loads the simulator's step traces and per-request lifecycle
//! records, joins them into one feature table, splits that table without
//! leaking temporally adjacent steps, and runs the diagnostics that decide
//! whether the dataset can be trusted. Metrics and baselines live in
//! `stepml-eval`; rows are handed over as [`stepml_eval::StepSample`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  ┌───────────┐  ┌────────────┐
//! │  Trace   │  │ Lifecycle │  │ Experiment │
//! │  Loader  │  │  Loader   │  │  Metadata  │
//! └────┬─────┘  └─────┬─────┘  └─────┬──────┘
//!      │              │              │
//!      │        ┌─────▼─────┐        │
//!      ├───────▶│    KV     │        │
//!      │        │ Estimator │        │
//!      │        └─────┬─────┘        │
//!      ▼              ▼              ▼
//! ┌─────────────────────────────────────────┐
//! │            Dataset Assembler            │
//! └────────────────────┬────────────────────┘
//!                      │ StepTable
//!        ┌─────────────┼──────────────┐
//!        ▼             ▼              ▼
//!  ┌──────────┐  ┌──────────┐  ┌────────────┐
//!  │  Splits  │  │ Sampling │  │ Validators │──▶ stepml-eval
//!  └──────────┘  └──────────┘  └────────────┘
//! ```

pub mod calibration;
pub mod config;
pub mod dataset;
pub mod error;
pub mod experiment;
pub mod kv;
pub mod lifecycle;
pub mod sampling;
pub mod splits;
pub mod trace;
pub mod validation;

// Re-export key types for convenience.
pub use calibration::{per_group_coefficients, CalibrationKey, GroupCalibration};
pub use config::StepMlConfig;
pub use dataset::{
    load_all_experiments, load_all_experiments_with_kv, load_experiment_steps, Assembly,
    DatasetLayout, ExperimentFailure, StepRow, StepTable,
};
pub use error::DataError;
pub use experiment::{normalize_model_name, parse_experiment_metadata, ExperimentMeta};
pub use kv::{estimate_step_kv, extract_kv_features, KvStats};
pub use lifecycle::{load_lifecycle, LifecycleRecord};
pub use sampling::{characterize_sampling, GapStats, SamplingReport};
pub use splits::{
    leave_one_group_out, leave_one_model_out, leave_one_workload_out, normalize_model_names,
    random_split, temporal_split, Fold, GroupKey, ModelFolds, Split, SplitFractions,
};
pub use trace::{load_trace, AttrValue, StepRecord};
pub use validation::{
    temporal_vs_random_split, validate_progress_index, LeakageReport, ProgressIndexReport,
};

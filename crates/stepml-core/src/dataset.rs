//! Dataset assembly across experiment directories.

use crate::error::DataError;
use crate::experiment::{parse_experiment_metadata, ExperimentMeta};
use crate::kv::{extract_kv_features, KvStats};
use crate::lifecycle::{load_lifecycle, LIFECYCLE_FILE};
use crate::trace::{load_trace, StepRecord, BATCH_SUMMARY_EVENT, TRACE_FILE};
use serde::Serialize;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use stepml_eval::StepSample;

/// Where the input files live inside an experiment directory.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetLayout {
    pub trace_file: PathBuf,
    pub lifecycle_file: PathBuf,
    pub batch_summary_event: String,
}

impl Default for DatasetLayout {
    fn default() -> Self {
        Self {
            trace_file: PathBuf::from(TRACE_FILE),
            lifecycle_file: PathBuf::from(LIFECYCLE_FILE),
            batch_summary_event: BATCH_SUMMARY_EVENT.to_string(),
        }
    }
}

/// One row of the assembled table.
///
/// Serializes flat: simulator column names, then the metadata columns,
/// then the KV columns when KV estimation ran. Unknown trace attributes
/// stay nested under `extra`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRow {
    #[serde(flatten)]
    pub record: StepRecord,
    #[serde(flatten)]
    pub meta: ExperimentMeta,
    #[serde(flatten)]
    pub kv: Option<KvStats>,
}

impl StepRow {
    /// Batch features and target for the evaluation crate, if all present.
    pub fn sample(&self) -> Option<StepSample> {
        Some(StepSample::new(
            self.record.prefill_tokens? as f64,
            self.record.decode_tokens? as f64,
            self.record.duration_us? as f64,
        ))
    }
}

/// The assembled step table. Row indices are the identity used by splits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepTable {
    pub rows: Vec<StepRow>,
}

impl StepTable {
    pub fn new(rows: Vec<StepRow>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Evaluation samples for the given row indices. Rows missing a batch
    /// feature or the duration are skipped.
    pub fn samples(&self, indices: &[usize]) -> Vec<StepSample> {
        indices
            .iter()
            .filter_map(|&i| self.rows.get(i).and_then(StepRow::sample))
            .collect()
    }

    /// Experiment id of each sample [`StepTable::samples`] yields for the
    /// same indices, in the same order.
    pub fn sample_experiments(&self, indices: &[usize]) -> Vec<&str> {
        indices
            .iter()
            .filter_map(|&i| self.rows.get(i))
            .filter(|row| row.sample().is_some())
            .map(|row| row.record.experiment_id.as_str())
            .collect()
    }

    /// Evaluation samples for every row.
    pub fn all_samples(&self) -> Vec<StepSample> {
        self.rows.iter().filter_map(StepRow::sample).collect()
    }

    /// Indices of rows whose recorded duration disagrees with their
    /// timestamps by more than `tolerance_us`.
    pub fn inconsistent_durations(&self, tolerance_us: f64) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| {
                row.record
                    .duration_drift_us()
                    .is_some_and(|drift| drift.abs() > tolerance_us)
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Write the table as JSON lines.
    pub fn write_jsonl(&self, path: &Path) -> Result<(), DataError> {
        let file = File::create(path).map_err(|e| DataError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        self.to_writer(&mut writer)
            .and_then(|_| writer.flush())
            .map_err(|e| DataError::io(path, e))
    }

    /// Serialize the table as JSON lines into any writer.
    pub fn to_writer<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        for row in &self.rows {
            serde_json::to_writer(&mut *writer, row)?;
            writeln!(writer)?;
        }
        Ok(())
    }
}

/// An experiment that was eligible but could not be loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentFailure {
    pub experiment_id: String,
    pub path: PathBuf,
    pub error: String,
}

/// Result of assembling a data root.
#[derive(Debug, Clone, Default)]
pub struct Assembly {
    pub table: StepTable,
    /// Experiments that contributed rows, in load order.
    pub loaded: Vec<String>,
    /// Directories without the required input files.
    pub skipped: Vec<String>,
    pub failures: Vec<ExperimentFailure>,
}

/// Load one experiment's steps without metadata or KV features.
///
/// Step ids must be unique within the experiment; a repeated id is
/// reported as malformed data.
pub fn load_experiment_steps(
    experiment_dir: &Path,
    layout: &DatasetLayout,
) -> Result<Vec<StepRecord>, DataError> {
    let experiment_id = experiment_id_of(experiment_dir);
    let path = experiment_dir.join(&layout.trace_file);
    let records = load_trace(&path, &experiment_id, &layout.batch_summary_event)?;
    check_unique_step_ids(&records, &path)?;
    Ok(records)
}

fn check_unique_step_ids(records: &[StepRecord], path: &Path) -> Result<(), DataError> {
    let mut seen = HashSet::with_capacity(records.len());
    for id in records.iter().filter_map(|r| r.step_id) {
        if !seen.insert(id) {
            return Err(DataError::malformed(
                path,
                0,
                format!("duplicate step.id {}", id),
            ));
        }
    }
    Ok(())
}

/// Assemble step rows from every experiment under `data_root` that has a
/// trace file.
pub fn load_all_experiments(
    data_root: &Path,
    layout: &DatasetLayout,
) -> Result<Assembly, DataError> {
    assemble(data_root, layout, false)
}

/// Assemble step rows with KV features from every experiment that has both
/// a trace file and a lifecycle file.
pub fn load_all_experiments_with_kv(
    data_root: &Path,
    layout: &DatasetLayout,
) -> Result<Assembly, DataError> {
    assemble(data_root, layout, true)
}

fn experiment_id_of(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn experiment_dirs(data_root: &Path) -> Result<Vec<PathBuf>, DataError> {
    let entries = std::fs::read_dir(data_root).map_err(|e| DataError::io(data_root, e))?;
    let mut dirs = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| DataError::io(data_root, e))?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn load_experiment(
    dir: &Path,
    experiment_id: &str,
    layout: &DatasetLayout,
    with_kv: bool,
) -> Result<Vec<StepRow>, DataError> {
    let meta = parse_experiment_metadata(experiment_id)?;
    let records = load_experiment_steps(dir, layout)?;

    let kv: Vec<Option<KvStats>> = if with_kv {
        let lifecycle = load_lifecycle(&dir.join(&layout.lifecycle_file))?;
        extract_kv_features(&records, &lifecycle)
            .into_iter()
            .map(Some)
            .collect()
    } else {
        vec![None; records.len()]
    };

    Ok(records
        .into_iter()
        .zip(kv)
        .map(|(record, kv)| StepRow {
            record,
            meta: meta.clone(),
            kv,
        })
        .collect())
}

fn assemble(
    data_root: &Path,
    layout: &DatasetLayout,
    with_kv: bool,
) -> Result<Assembly, DataError> {
    let mut assembly = Assembly::default();

    for dir in experiment_dirs(data_root)? {
        let experiment_id = experiment_id_of(&dir);
        let has_trace = dir.join(&layout.trace_file).is_file();
        let has_lifecycle = dir.join(&layout.lifecycle_file).is_file();
        if !has_trace || (with_kv && !has_lifecycle) {
            tracing::debug!(
                experiment = %experiment_id,
                "skipping directory without required inputs"
            );
            assembly.skipped.push(experiment_id);
            continue;
        }

        match load_experiment(&dir, &experiment_id, layout, with_kv) {
            Ok(rows) => {
                if let Some(first) = rows.first() {
                    tracing::info!(
                        experiment = %experiment_id,
                        rows = rows.len(),
                        model = %first.meta.model,
                        workload = %first.meta.workload,
                        "experiment loaded"
                    );
                }
                assembly.table.rows.extend(rows);
                assembly.loaded.push(experiment_id);
            }
            Err(e) => {
                tracing::warn!(
                    experiment = %experiment_id,
                    path = %dir.display(),
                    error = %e,
                    "failed to load experiment"
                );
                assembly.failures.push(ExperimentFailure {
                    experiment_id,
                    path: dir,
                    error: e.to_string(),
                });
            }
        }
    }

    tracing::info!(
        experiments = assembly.loaded.len(),
        rows = assembly.table.len(),
        skipped = assembly.skipped.len(),
        failed = assembly.failures.len(),
        with_kv,
        "dataset assembled"
    );
    Ok(assembly)
}

//! Experiment identifier parsing.
//!
//! Experiment directories are named `<YYYYMMDD-HHMMSS>-<model>-tp<N>-<workload>`.
//! Model names may contain hyphens (`mixtral-8x7b-v0-1`); workload names
//! never do, so the last `-tp<digits>-` token separates the two.

use crate::error::DataError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Width of the `YYYYMMDD-HHMMSS` prefix.
const TIMESTAMP_LEN: usize = 15;

/// Variant suffixes stripped so logically identical models group together.
const MODEL_VARIANT_SUFFIXES: &[&str] = &["-hf"];

/// Metadata derived from an experiment identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExperimentMeta {
    pub timestamp: String,
    pub model: String,
    /// Tensor-parallel degree.
    pub tp: u32,
    pub workload: String,
}

fn strict_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{8}-\d{6})-(.+)-tp(\d+)-(\w+)$").expect("static regex is valid")
    })
}

fn tp_anchor() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-tp\d+-").expect("static regex is valid"))
}

fn parse_tp(digits: &str, id: &str) -> Result<u32, DataError> {
    match digits.parse::<u32>() {
        Ok(tp) if tp > 0 => Ok(tp),
        _ => Err(DataError::Parse(format!(
            "invalid tensor-parallel degree '{}' in '{}'",
            digits, id
        ))),
    }
}

/// Parse an experiment identifier (typically a directory basename).
///
/// The strict four-part pattern is tried first. Failing that, the last
/// `-tp<digits>-` occurrence is used as the anchor: the model is everything
/// between the timestamp prefix and the anchor, the workload everything
/// after it.
pub fn parse_experiment_metadata(id: &str) -> Result<ExperimentMeta, DataError> {
    if let Some(caps) = strict_pattern().captures(id) {
        return Ok(ExperimentMeta {
            timestamp: caps[1].to_string(),
            model: caps[2].to_string(),
            tp: parse_tp(&caps[3], id)?,
            workload: caps[4].to_string(),
        });
    }

    let anchor = tp_anchor()
        .find_iter(id)
        .last()
        .ok_or_else(|| DataError::Parse(format!("cannot parse experiment id '{}'", id)))?;
    // The match is "-tp" + digits + "-".
    let digits = &id[anchor.start() + 3..anchor.end() - 1];

    let timestamp = id.get(..TIMESTAMP_LEN).unwrap_or(id).to_string();
    let model = id
        .get(TIMESTAMP_LEN + 1..anchor.start())
        .unwrap_or_default()
        .to_string();
    let workload = id[anchor.end()..].to_string();

    Ok(ExperimentMeta {
        timestamp,
        model,
        tp: parse_tp(digits, id)?,
        workload,
    })
}

/// Strip known variant suffixes from a model name.
pub fn normalize_model_name(model: &str) -> String {
    for suffix in MODEL_VARIANT_SUFFIXES {
        if let Some(stripped) = model.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    model.to_string()
}

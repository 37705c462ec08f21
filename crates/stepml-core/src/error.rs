//! Error types for dataset loading and assembly.

use std::io::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Required input file not found: {}", path.display())]
    MissingFile { path: PathBuf },
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Malformed data in {} at line {line}: {detail}", path.display())]
    MalformedData {
        path: PathBuf,
        /// 1-based line number, or 0 when the whole document failed to parse.
        line: usize,
        detail: String,
    },
    #[error("Parse error: {0}")]
    Parse(String),
}

impl DataError {
    /// Classify an I/O failure. Undecodable content (invalid UTF-8) is a
    /// malformed input, not a read failure.
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            ErrorKind::NotFound => DataError::MissingFile { path },
            ErrorKind::InvalidData => DataError::malformed(path, 0, source),
            _ => DataError::Io { path, source },
        }
    }

    pub(crate) fn malformed(path: impl Into<PathBuf>, line: usize, detail: impl ToString) -> Self {
        DataError::MalformedData {
            path: path.into(),
            line,
            detail: detail.to_string(),
        }
    }
}

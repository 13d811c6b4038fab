//! Error types for cohort-clinical.

use std::path::PathBuf;

use thiserror::Error;

use cohort_sync::TransportError;

#[derive(Debug, Error)]
pub enum ClinicalError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The warehouse snapshot is not valid JSON for the expected shape.
    #[error("failed to parse warehouse snapshot at {path}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A warehouse query failed.
    #[error("warehouse query failed: {0}")]
    Warehouse(String),

    /// The registry export could not be fetched.
    #[error("export from {source_name} failed after {attempts} attempt(s): {error}")]
    Export {
        source_name: String,
        attempts: u32,
        #[source]
        error: TransportError,
    },

    /// A registry row lacks a field the workflow requested.
    #[error("row {row}: missing field '{field}'")]
    MissingField { row: usize, field: String },
}

/// Convenience constructor for [`ClinicalError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ClinicalError {
    ClinicalError::Io {
        path: path.into(),
        source,
    }
}

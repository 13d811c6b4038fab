//! Error types for cohort-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::RecordId;

/// Failures converting an exported row into a typed record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    /// A field required by the field map was absent from the exported row.
    #[error("row {row}: missing field '{field}'")]
    MissingField { row: usize, field: String },

    /// A field was present but its value could not be interpreted.
    #[error("row {row} (record '{record}'): invalid value '{value}' for field '{field}'")]
    InvalidField {
        row: usize,
        record: String,
        field: String,
        value: String,
    },
}

/// Failures resolving one candidate to an identifier.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// No lookup matched and the candidate lacks the name/DOB needed to mint.
    #[error("insufficient identity data for record '{record}'")]
    InsufficientIdentityData { record: RecordId },

    /// The next identifier would land inside the reserved range.
    #[error("identifier range exhausted: next id {next} reaches reserved threshold {threshold}")]
    IdentifierRangeExhausted { next: u64, threshold: u64 },
}

/// Failures loading `~/.cohort/config.yaml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error; serde_yaml includes line context.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("config not found at {path}")]
    NotFound { path: PathBuf },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// Parsed cleanly but a value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

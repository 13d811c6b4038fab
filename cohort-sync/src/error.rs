//! Error types for cohort-sync.

use std::path::PathBuf;

use thiserror::Error;

use cohort_core::error::RecordError;

/// A single remote call failed. Every variant is retryable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection, DNS or TLS failure before a response arrived.
    #[error("request to {endpoint} failed: {message}")]
    Request { endpoint: String, message: String },

    /// The endpoint answered with a non-success status.
    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// The response body could not be decoded.
    #[error("malformed response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
}

/// Run-level failures. Any of these aborts the batch before writes begin.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An export call exhausted its retries.
    #[error("export from {source_name} failed after {attempts} attempt(s): {error}")]
    Export {
        source_name: String,
        attempts: u32,
        #[source]
        error: TransportError,
    },

    /// An exported row did not match the configured field map.
    #[error("{source_name} export is malformed: {error}")]
    Record {
        source_name: String,
        #[source]
        error: RecordError,
    },

    /// CSV read/write failure with annotated path.
    #[error("CSV error at {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Convenience constructor for [`SyncError::Csv`].
pub(crate) fn csv_err(path: impl Into<PathBuf>, source: csv::Error) -> SyncError {
    SyncError::Csv {
        path: path.into(),
        source,
    }
}

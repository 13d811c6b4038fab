//! Seams between the pipeline and the record stores.
//!
//! The HTTP client lives in the CLI; the CSV adapter lives in
//! [`crate::csv_intake`]. Tests use in-memory implementations.

use serde::{Deserialize, Serialize};

use cohort_core::FlatRecord;

use crate::error::TransportError;

/// Acknowledgement of a single-record import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportAck {
    /// Number of records the store reports as written.
    pub count: u64,
}

/// A source of flat records.
pub trait RecordExport {
    /// Human-readable name used in logs and errors.
    fn name(&self) -> &str;

    /// Export every record. An empty `fields` slice means all fields.
    ///
    /// The call is all-or-nothing: a partial export is an error.
    fn export_records(&self, fields: &[String]) -> Result<Vec<FlatRecord>, TransportError>;
}

/// A store accepting single-record upserts with overwrite semantics.
pub trait RecordImport {
    fn import_record(&self, record: &FlatRecord) -> Result<ImportAck, TransportError>;
}

/// Keep only `fields` from each row; an empty list keeps everything.
pub fn project_fields(rows: &[FlatRecord], fields: &[String]) -> Vec<FlatRecord> {
    if fields.is_empty() {
        return rows.to_vec();
    }
    rows.iter()
        .map(|row| {
            row.iter()
                .filter(|(k, _)| fields.iter().any(|f| f == *k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .collect()
}

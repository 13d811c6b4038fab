//! CSV batch intake.
//!
//! Staff batch uploads arrive as CSV files with the same columns as the
//! intake export. [`CsvIntake`] loads one eagerly and serves it through
//! [`RecordExport`] so it runs through the pipeline under
//! [`WritePolicy::NewOnly`](crate::WritePolicy::NewOnly). Rows that were
//! rejected or failed are written to a `<stem>.rejected.csv` sibling.

use std::path::{Path, PathBuf};

use tracing::info;

use cohort_core::FlatRecord;

use crate::error::{csv_err, SyncError, TransportError};
use crate::report::SyncReport;
use crate::transport::{project_fields, RecordExport};

/// Column appended to rejected rows.
pub const REJECTION_COLUMN: &str = "rejection_reason";

#[derive(Debug, Clone)]
pub struct CsvIntake {
    path: PathBuf,
    name: String,
    headers: Vec<String>,
    rows: Vec<FlatRecord>,
}

impl CsvIntake {
    /// Read every row of `path`. Short rows get empty strings for missing
    /// trailing columns.
    pub fn open(path: &Path) -> Result<Self, SyncError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_path(path)
            .map_err(|e| csv_err(path, e))?;

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| csv_err(path, e))?
            .iter()
            .map(str::to_owned)
            .collect();

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result.map_err(|e| csv_err(path, e))?;
            let row: FlatRecord = headers
                .iter()
                .enumerate()
                .map(|(i, h)| (h.clone(), record.get(i).unwrap_or("").to_owned()))
                .collect();
            rows.push(row);
        }

        info!(path = %path.display(), rows = rows.len(), "loaded CSV intake");
        Ok(Self {
            path: path.to_path_buf(),
            name: path.display().to_string(),
            headers,
            rows,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Write failed rows from `report` next to the input file.
    ///
    /// Returns the path written, or `None` when nothing failed.
    pub fn write_rejected(&self, report: &SyncReport) -> Result<Option<PathBuf>, SyncError> {
        let failed: Vec<_> = report
            .failures()
            .filter_map(|o| self.rows.get(o.row).map(|row| (row, o)))
            .collect();
        if failed.is_empty() {
            return Ok(None);
        }

        let out = rejected_path(&self.path);
        let mut writer = csv::Writer::from_path(&out).map_err(|e| csv_err(&out, e))?;

        let mut header = self.headers.clone();
        header.push(REJECTION_COLUMN.to_owned());
        writer.write_record(&header).map_err(|e| csv_err(&out, e))?;

        for (row, outcome) in failed {
            let mut fields: Vec<String> = self
                .headers
                .iter()
                .map(|h| row.get(h).cloned().unwrap_or_default())
                .collect();
            fields.push(
                outcome
                    .failure
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            );
            writer.write_record(&fields).map_err(|e| csv_err(&out, e))?;
        }
        writer
            .flush()
            .map_err(|e| csv_err(&out, csv::Error::from(e)))?;

        info!(path = %out.display(), rows = report.counts.failed, "wrote rejected rows");
        Ok(Some(out))
    }
}

impl RecordExport for CsvIntake {
    fn name(&self) -> &str {
        &self.name
    }

    fn export_records(&self, fields: &[String]) -> Result<Vec<FlatRecord>, TransportError> {
        Ok(project_fields(&self.rows, fields))
    }
}

/// `batch.csv` -> `batch.rejected.csv`
pub fn rejected_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "intake".to_owned());
    path.with_file_name(format!("{stem}.rejected.csv"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_path_is_sibling() {
        assert_eq!(
            rejected_path(Path::new("/data/batch_2024.csv")),
            PathBuf::from("/data/batch_2024.rejected.csv")
        );
    }
}

//! Per-participant results of an extraction or upload run.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Extract,
    Upload,
}

/// What the workflow decided for one participant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Skipped { reason: String },
    MrnNotFound,
    ReviewNeeded { similarity: f64 },
    Extracted {
        person_id: u64,
        similarity: f64,
        labs_needing_review: Vec<String>,
    },
    /// Warehouse queries kept failing; nothing was written.
    ExtractionFailed { attempts: u32, error: String },
    Uploaded,
    UploadFailed { reason: String },
}

/// Outcome of writing the result back to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WriteStatus {
    NotAttempted,
    Written { attempts: u32 },
    UnexpectedCount { count: u64 },
    Failed { attempts: u32, error: String },
}

impl WriteStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::UnexpectedCount { .. } | Self::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticipantOutcome {
    pub identity_id: String,
    pub action: Action,
    pub write: WriteStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClinicalCounts {
    pub total: usize,
    pub skipped: usize,
    pub extracted: usize,
    pub review_needed: usize,
    pub mrn_not_found: usize,
    pub extraction_failed: usize,
    pub uploaded: usize,
    pub upload_failed: usize,
    pub write_failures: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClinicalReport {
    pub phase: Phase,
    pub dry_run: bool,
    pub counts: ClinicalCounts,
    pub outcomes: Vec<ParticipantOutcome>,
}

impl ClinicalReport {
    pub fn new(phase: Phase, dry_run: bool, outcomes: Vec<ParticipantOutcome>) -> Self {
        let mut counts = ClinicalCounts {
            total: outcomes.len(),
            ..Default::default()
        };
        for o in &outcomes {
            match o.action {
                Action::Skipped { .. } => counts.skipped += 1,
                Action::MrnNotFound => counts.mrn_not_found += 1,
                Action::ReviewNeeded { .. } => counts.review_needed += 1,
                Action::Extracted { .. } => counts.extracted += 1,
                Action::ExtractionFailed { .. } => counts.extraction_failed += 1,
                Action::Uploaded => counts.uploaded += 1,
                Action::UploadFailed { .. } => counts.upload_failed += 1,
            }
            if o.write.is_failure() {
                counts.write_failures += 1;
            }
        }
        Self {
            phase,
            dry_run,
            counts,
            outcomes,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.counts.write_failures > 0
            || self.counts.upload_failed > 0
            || self.counts.extraction_failed > 0
    }
}

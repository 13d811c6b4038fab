//! Per-run outcome summary.

use std::fmt;

use serde::Serialize;

use cohort_core::{IdentityId, MatchedBy, RecordId, ResolutionResult};

use crate::pipeline::RecordState;

/// Why a record ended in [`RecordState::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// No lookup matched and name/DOB were incomplete. Never minted.
    InsufficientIdentityData,
    IdentifierRangeExhausted { next: u64, threshold: u64 },
    /// The import call failed on every attempt.
    Transport { attempts: u32, error: String },
    /// The store acknowledged a write count other than 1.
    UnexpectedWriteCount { count: u64 },
    /// Batch upload row without a medical record number.
    MissingMrn,
    /// Batch upload row whose MRN the registry already holds.
    KnownMrn,
    /// Batch upload row repeating an MRN from an earlier row.
    DuplicateMrn,
    /// Batch upload row that resolved to an existing participant.
    AlreadyRegistered {
        identity_id: IdentityId,
        matched_by: MatchedBy,
    },
}

impl FailureReason {
    /// Rows turned away by policy rather than broken by an error.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::InsufficientIdentityData
                | Self::MissingMrn
                | Self::KnownMrn
                | Self::DuplicateMrn
                | Self::AlreadyRegistered { .. }
        )
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientIdentityData => write!(f, "insufficient identity data"),
            Self::IdentifierRangeExhausted { next, threshold } => {
                write!(f, "identifier range exhausted ({next} >= {threshold})")
            }
            Self::Transport { attempts, error } => {
                write!(f, "import failed after {attempts} attempt(s): {error}")
            }
            Self::UnexpectedWriteCount { count } => {
                write!(f, "import acknowledged {count} records, expected 1")
            }
            Self::MissingMrn => write!(f, "missing MRN"),
            Self::KnownMrn => write!(f, "MRN already in registry"),
            Self::DuplicateMrn => write!(f, "MRN repeated earlier in batch"),
            Self::AlreadyRegistered {
                identity_id,
                matched_by,
            } => write!(f, "already registered as {identity_id} (matched by {matched_by})"),
        }
    }
}

/// Where one candidate ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordOutcome {
    /// Position in the intake export.
    pub row: usize,
    pub source_record_id: RecordId,
    pub is_repeat_instrument: bool,
    pub state: RecordState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ResolutionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    /// Import attempts made; 0 when the record never reached the push.
    pub attempts: u32,
}

impl RecordOutcome {
    pub fn is_failed(&self) -> bool {
        self.state == RecordState::Failed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounts {
    pub total: usize,
    pub confirmed: usize,
    /// Dry-run records that stopped after cleaning.
    pub cleaned: usize,
    pub failed: usize,
    pub insufficient: usize,
    pub minted: usize,
    pub matched: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub dry_run: bool,
    /// Largest identifier below the reserved range after the run.
    pub high_water_mark: u64,
    pub counts: SyncCounts,
    pub outcomes: Vec<RecordOutcome>,
}

impl SyncReport {
    pub fn new(outcomes: Vec<RecordOutcome>, high_water_mark: u64, dry_run: bool) -> Self {
        let mut counts = SyncCounts {
            total: outcomes.len(),
            ..Default::default()
        };
        for o in &outcomes {
            match o.state {
                RecordState::Confirmed => counts.confirmed += 1,
                RecordState::Cleaned => counts.cleaned += 1,
                RecordState::Failed => counts.failed += 1,
                _ => {}
            }
            if o.failure == Some(FailureReason::InsufficientIdentityData) {
                counts.insufficient += 1;
            }
            match o.resolution {
                Some(r) if r.is_new => counts.minted += 1,
                Some(_) => counts.matched += 1,
                None => {}
            }
        }
        Self {
            dry_run,
            high_water_mark,
            counts,
            outcomes,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &RecordOutcome> {
        self.outcomes.iter().filter(|o| o.is_failed())
    }

    pub fn has_failures(&self) -> bool {
        self.counts.failed > 0
    }
}

//! Domain types for participant identity resolution.
//!
//! Records cross the export boundary as [`FlatRecord`] maps and are converted
//! into the typed structs below by [`crate::record`]. Everything past that
//! boundary works on named fields only.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One exported row: field name to raw string value, in field-name order.
pub type FlatRecord = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// The stable participant identifier held by the authoritative registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(pub u64);

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for IdentityId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// A record key inside one source system (e.g. the intake system's `record_id`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn as_str(&self) -> &str {
        self.0.trim()
    }

    /// Blank keys never participate in lookups.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Demographics
// ---------------------------------------------------------------------------

/// Name and birth date of a dependent enrolled by a parent or guardian.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChildFacet {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: String,
}

/// Identity-bearing fields shared by candidate and registry records.
///
/// Values are kept exactly as exported; comparison keys come from
/// [`crate::normalize::project`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Demographics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lab_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child: Option<ChildFacet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One inbound record from the non-authoritative system.
///
/// Never mutated after parsing; the pipeline builds a cleaned copy of
/// `payload` for the write-back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRecord {
    pub source_record_id: RecordId,
    pub demographics: Demographics,
    /// Sub-event of a parent record sharing the same `source_record_id`.
    pub is_repeat_instrument: bool,
    /// The full exported row.
    pub payload: FlatRecord,
}

/// One row of the authoritative registry, projected for indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    pub identity_id: IdentityId,
    /// Intake-system key stored on the registry row; may be blank.
    pub source_record_id: RecordId,
    pub demographics: Demographics,
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Which rule of the ordered fallback produced an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchedBy {
    RecordId,
    LabId,
    NameDobAdult,
    NameDobChild,
    None,
}

impl fmt::Display for MatchedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchedBy::RecordId => write!(f, "RECORD_ID"),
            MatchedBy::LabId => write!(f, "LAB_ID"),
            MatchedBy::NameDobAdult => write!(f, "NAME_DOB_ADULT"),
            MatchedBy::NameDobChild => write!(f, "NAME_DOB_CHILD"),
            MatchedBy::None => write!(f, "NONE"),
        }
    }
}

/// Outcome of resolving one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub identity_id: IdentityId,
    pub is_new: bool,
    pub matched_by: MatchedBy,
}

impl ResolutionResult {
    pub fn matched(identity_id: IdentityId, matched_by: MatchedBy) -> Self {
        Self {
            identity_id,
            is_new: false,
            matched_by,
        }
    }

    pub fn minted(identity_id: IdentityId) -> Self {
        Self {
            identity_id,
            is_new: true,
            matched_by: MatchedBy::None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! MRN facility codes.
//!
//! The warehouse keys patients by `(mrn, facility)`. The facility is implied
//! by the MRN's length; anything else is rejected rather than guessed.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FacilityCode {
    #[serde(rename = "P")]
    P,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "UI")]
    Ui,
}

impl FacilityCode {
    /// 7 digits -> `P`, 8 -> `A`, 10 -> `UI`.
    pub fn from_mrn(mrn: &str) -> Option<Self> {
        let mrn = mrn.trim();
        if mrn.is_empty() || !mrn.bytes().all(|b| b.is_ascii_digit()) {
            warn!(%mrn, "unhandled MRN format");
            return None;
        }
        match mrn.len() {
            7 => Some(Self::P),
            8 => Some(Self::A),
            10 => Some(Self::Ui),
            _ => {
                warn!(%mrn, len = mrn.len(), "unhandled MRN length");
                None
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::P => "P",
            Self::A => "A",
            Self::Ui => "UI",
        }
    }
}

impl fmt::Display for FacilityCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

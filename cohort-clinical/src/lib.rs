//! Clinical warehouse matching and variable extraction.
//!
//! - [`facility`] MRN facility codes
//! - [`warehouse`] query trait and JSON snapshot backend
//! - [`matcher`] MRN + birth-date matching
//! - [`extraction`] participation, eligibility and variable rules
//! - [`workflow`] extraction and upload runs

pub mod error;
pub mod extraction;
pub mod facility;
pub mod fields;
pub mod matcher;
pub mod report;
pub mod warehouse;
pub mod workflow;

pub use error::ClinicalError;
pub use extraction::{ClinicalVariables, Eligibility, Participant, Participation};
pub use facility::FacilityCode;
pub use matcher::{FuzzyClinicalMatcher, MatchOutcome};
pub use report::{Action, ClinicalReport, ParticipantOutcome, Phase, WriteStatus};
pub use warehouse::{ClinicalWarehouse, JsonWarehouse};
pub use workflow::{ClinicalOptions, ExtractionWorkflow, UploadWorkflow};

//! Write-back payload construction.
//!
//! The cleaned record is the candidate's exported row, minus fields the
//! registry does not accept, plus the resolved identifier and, for freshly
//! minted top-level records, the new-record flag.

use std::collections::BTreeSet;

use cohort_core::config::CleaningConfig;
use cohort_core::{CandidateRecord, FlatRecord, IntakeFieldMap, RegistryFieldMap, ResolutionResult};

/// Value written to the new-record flag on minted rows.
pub const NEW_RECORD_MARKER: &str = "1";

#[derive(Debug, Clone)]
pub struct RecordCleaner {
    strip: BTreeSet<String>,
    top_level_only: BTreeSet<String>,
    identity_field: String,
    /// The registry's sync flag; never copied from the source row.
    registry_flag: String,
    /// Stamped on minted top-level rows.
    new_record_flag: String,
}

impl RecordCleaner {
    pub fn new(
        cleaning: &CleaningConfig,
        intake: &IntakeFieldMap,
        registry: &RegistryFieldMap,
    ) -> Self {
        let mut top_level_only: BTreeSet<String> =
            cleaning.top_level_only_fields.iter().cloned().collect();
        top_level_only.insert(intake.record_id.clone());
        top_level_only.insert(registry.new_record_flag.clone());

        Self {
            strip: cleaning.strip_fields.iter().cloned().collect(),
            top_level_only,
            identity_field: registry.identity_id.clone(),
            registry_flag: registry.new_record_flag.clone(),
            new_record_flag: registry.new_record_flag.clone(),
        }
    }

    /// Stamp `field` instead of the registry's sync flag on minted rows.
    pub fn with_new_record_flag(mut self, field: &str) -> Self {
        self.top_level_only.insert(field.to_owned());
        self.new_record_flag = field.to_owned();
        self
    }

    pub fn clean(&self, candidate: &CandidateRecord, resolution: &ResolutionResult) -> FlatRecord {
        let mut out: FlatRecord = candidate
            .payload
            .iter()
            .filter(|(k, _)| !self.strip.contains(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        // Matched rows never carry a flag, whatever the source row held.
        out.remove(&self.registry_flag);
        out.remove(&self.new_record_flag);

        if candidate.is_repeat_instrument {
            out.retain(|k, _| !self.top_level_only.contains(k));
        } else if resolution.is_new {
            out.insert(self.new_record_flag.clone(), NEW_RECORD_MARKER.to_owned());
        }

        out.insert(
            self.identity_field.clone(),
            resolution.identity_id.to_string(),
        );
        out
    }
}

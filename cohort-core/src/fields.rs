//! Field-name maps for the two registries.
//!
//! Both systems are exported as flat rows; these maps name the columns that
//! carry identity data. Defaults match the production projects and can be
//! overridden under `fields:` in the config file.

use serde::{Deserialize, Serialize};

/// Columns of the non-authoritative intake system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeFieldMap {
    pub record_id: String,
    pub lab_id: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: String,
    pub child_first_name: String,
    pub child_last_name: String,
    pub child_date_of_birth: String,
    pub age: String,
    /// Non-empty on sub-event rows of a repeating instrument.
    pub repeat_instance: String,
}

impl Default for IntakeFieldMap {
    fn default() -> Self {
        Self {
            record_id: "record_id".into(),
            lab_id: "participant_lab_id".into(),
            first_name: "first_name".into(),
            last_name: "last_name".into(),
            date_of_birth: "date_of_birth".into(),
            child_first_name: "first_name_child".into(),
            child_last_name: "last_name_child".into(),
            child_date_of_birth: "date_of_birth_child".into(),
            age: "age".into(),
            repeat_instance: "redcap_repeat_instance".into(),
        }
    }
}

/// Columns of the authoritative registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryFieldMap {
    pub identity_id: String,
    /// Where the registry stores the intake system's record key.
    pub record_id: String,
    pub lab_id: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: String,
    pub child_first_name: String,
    pub child_last_name: String,
    pub child_date_of_birth: String,
    pub age: String,
    /// Set to `"1"` on rows created by the sync.
    pub new_record_flag: String,
}

impl Default for RegistryFieldMap {
    fn default() -> Self {
        Self {
            identity_id: "cuimc_id".into(),
            record_id: "record_id".into(),
            lab_id: "participant_lab_id".into(),
            first_name: "first_local".into(),
            last_name: "last_local".into(),
            date_of_birth: "dob".into(),
            child_first_name: "child_first".into(),
            child_last_name: "last_child".into(),
            child_date_of_birth: "dob_child".into(),
            age: "age".into(),
            new_record_flag: "r4_yn".into(),
        }
    }
}

impl RegistryFieldMap {
    /// Columns requested from the registry export to build the index.
    pub fn export_fields(&self) -> Vec<String> {
        vec![
            self.identity_id.clone(),
            self.record_id.clone(),
            self.lab_id.clone(),
            self.first_name.clone(),
            self.last_name.clone(),
            self.date_of_birth.clone(),
            self.child_first_name.clone(),
            self.child_last_name.clone(),
            self.child_date_of_birth.clone(),
        ]
    }
}

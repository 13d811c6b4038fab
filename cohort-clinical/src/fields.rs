//! Registry field names and coded values used by the clinical workflow.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::warehouse::{ConditionKind, LabKind};

pub const IDENTITY_ID: &str = "cuimc_id";
pub const INTAKE_RECORD_ID: &str = "record_id";
pub const MRN: &str = "mrn";
pub const DATE_OF_BIRTH: &str = "participant_date_of_birth";
pub const FIRST_NAME: &str = "participant_first_name";
pub const LAST_NAME: &str = "last_name";

pub const AGE: &str = "age";
pub const CONSENT_DATE: &str = "date_consent_cu_2";
pub const PARENTAL_PERMISSION_DATE: &str = "date_consent_cu_2_pp";
pub const WITHDRAWAL: &str = "participant_withdrawal";

pub const STATUS: &str = "gira_cde_status";
pub const SCRIPT_OUTPUT: &str = "gira_cde_script_output";
pub const MRN_QUERIED: &str = "gira_cde_mrn_queried";
pub const DOB_QUERIED: &str = "gira_cde_dob_queried";
pub const INSTANCE_QUERIED: &str = "gira_cde_omop_instance";
pub const REVIEW_STATUS: &str = "gira_cde_review_status";
pub const UPLOAD_SCRIPT_OUTPUT: &str = "gira_cde_r4_script_output";
pub const LOCAL_COMPLETE: &str = "gira_clinical_variables_local_complete";
pub const UPLOAD_COMPLETE: &str = "gira_clinical_variables_complete";

pub const EHR_FIRST_NAME: &str = "ehr_participant_first_name_local";
pub const EHR_LAST_NAME: &str = "ehr_participant_last_name_local";
pub const EHR_DATE_OF_BIRTH: &str = "ehr_date_of_birth_local";
pub const ALLERGY_COUNT: &str = "count_positive_allergy_local";
pub const ALLERGY_FLAG: &str = "allergy_test_flag_local";

/// Suffix carried by every locally stored data field.
pub const LOCAL_SUFFIX: &str = "_local";

/// Value of the withdrawal field when the participant has withdrawn.
pub const YES: &str = "1";

/// Missing-measurement sentinels.
pub const MISSING_VALUE: i64 = -9;
pub const MISSING_DATE: &str = "1900-01-01";
pub const MISSING_CONCEPT_NAME: &str = "N/A";

/// Appended between runs in a script log.
pub const LOG_SEPARATOR: &str = "===============================\n";

pub const PARTICIPATION_FIELDS: [&str; 4] = [AGE, CONSENT_DATE, PARENTAL_PERMISSION_DATE, WITHDRAWAL];

/// Lab value field names for a prefix such as `sbp`.
pub fn lab_fields(prefix: &str) -> [String; 4] {
    [
        format!("{prefix}_lab_name_local"),
        format!("{prefix}_date_at_event_local"),
        format!("{prefix}_measurement_concept_id_local"),
        format!("{prefix}_value_most_recent_local"),
    ]
}

/// Condition field names for a condition such as `wheeze`.
///
/// Returns `(age_at_first, age_at_second, flag)`.
pub fn condition_fields(name: &str) -> (String, String, String) {
    let flag = match name {
        "wheeze" => "wheezing_flag_local".to_owned(),
        other => format!("{other}_flag_local"),
    };
    (
        format!("age_at_first_{name}_event_local"),
        format!("age_at_second_{name}_event_local"),
        flag,
    )
}

/// Every extracted data field, in registry form (with the `_local` suffix).
pub fn data_fields() -> Vec<String> {
    let mut out: Vec<String> = [
        EHR_FIRST_NAME,
        EHR_LAST_NAME,
        EHR_DATE_OF_BIRTH,
        ALLERGY_COUNT,
        ALLERGY_FLAG,
    ]
    .iter()
    .map(|f| f.to_string())
    .collect();
    for lab in LabKind::ALL {
        out.extend(lab_fields(lab.field_prefix()));
    }
    for kind in [ConditionKind::Wheeze, ConditionKind::Eczema] {
        let (first, second, flag) = condition_fields(kind.field_name());
        out.extend([first, second, flag]);
    }
    out
}

// ---------------------------------------------------------------------------
// Coded values
// ---------------------------------------------------------------------------

/// Outcome of the last extraction attempt, as stored on the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CdeStatus {
    Completed,
    DobMismatchReviewNeeded,
    DobMismatchDoNotProceed,
    /// Staff reviewed the mismatch and approved extraction anyway.
    DobMismatchProceed,
    MrnNotFound,
}

impl CdeStatus {
    pub fn code(self) -> &'static str {
        match self {
            Self::Completed => "1",
            Self::DobMismatchReviewNeeded => "2",
            Self::DobMismatchDoNotProceed => "3",
            Self::DobMismatchProceed => "4",
            Self::MrnNotFound => "5",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "1" => Some(Self::Completed),
            "2" => Some(Self::DobMismatchReviewNeeded),
            "3" => Some(Self::DobMismatchDoNotProceed),
            "4" => Some(Self::DobMismatchProceed),
            "5" => Some(Self::MrnNotFound),
            _ => None,
        }
    }
}

impl fmt::Display for CdeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::DobMismatchReviewNeeded => "dob mismatch, review needed",
            Self::DobMismatchDoNotProceed => "dob mismatch, do not proceed",
            Self::DobMismatchProceed => "dob mismatch, proceed",
            Self::MrnNotFound => "mrn not found",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReviewStatus {
    NotNeeded,
    Needed,
    Reviewed,
}

impl ReviewStatus {
    pub fn code(self) -> &'static str {
        match self {
            Self::NotNeeded => "1",
            Self::Needed => "2",
            Self::Reviewed => "3",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "1" => Some(Self::NotNeeded),
            "2" => Some(Self::Needed),
            "3" => Some(Self::Reviewed),
            _ => None,
        }
    }
}

/// Instrument completion marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Complete {
    Incomplete,
    Complete,
}

impl Complete {
    pub fn code(self) -> &'static str {
        match self {
            Self::Incomplete => "0",
            Self::Complete => "2",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_round_trip() {
        for s in [
            CdeStatus::Completed,
            CdeStatus::DobMismatchReviewNeeded,
            CdeStatus::DobMismatchDoNotProceed,
            CdeStatus::DobMismatchProceed,
            CdeStatus::MrnNotFound,
        ] {
            assert_eq!(CdeStatus::from_code(s.code()), Some(s));
        }
        assert_eq!(CdeStatus::from_code(""), None);
        assert_eq!(CdeStatus::from_code("9"), None);
    }

    #[test]
    fn field_name_builders() {
        assert_eq!(lab_fields("a1c")[3], "a1c_value_most_recent_local");
        let (first, _, flag) = condition_fields("wheeze");
        assert_eq!(first, "age_at_first_wheeze_event_local");
        assert_eq!(flag, "wheezing_flag_local");
        assert_eq!(condition_fields("eczema").2, "eczema_flag_local");
    }

    #[test]
    fn data_fields_all_carry_local_suffix() {
        let all = data_fields();
        assert_eq!(all.len(), 5 + 6 * 4 + 2 * 3);
        assert!(all.iter().all(|f| f.ends_with(LOCAL_SUFFIX)));
    }
}

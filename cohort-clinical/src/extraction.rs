//! Participation, eligibility and variable extraction rules.
//!
//! Everything here is pure: rows in, decisions and field maps out. The
//! workflow module owns the I/O.

use cohort_core::FlatRecord;
use serde::Serialize;
use tracing::{debug, error};

use crate::error::ClinicalError;
use crate::fields::{self, CdeStatus};
use crate::warehouse::{ClinicalWarehouse, ConditionEvent, ConditionKind, LabKind, Measurement};

/// Age at which adult consent replaces parental permission.
pub const ADULT_AGE: i64 = 18;

/// A first condition event must occur before this age.
pub const EARLY_CHILDHOOD_AGE: f64 = 3.0;

/// Minimum days between the first and second condition event.
pub const EVENT_SPACING_DAYS: i64 = 1;

/// Positive allergy tests needed to raise the allergy flag.
pub const ALLERGY_FLAG_THRESHOLD: u32 = 2;

fn field<'r>(row: &'r FlatRecord, name: &str) -> &'r str {
    row.get(name).map(|v| v.trim()).unwrap_or("")
}

// ---------------------------------------------------------------------------
// Participation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Participation {
    Active,
    Withdrawn,
    MissingAge,
    InvalidAge { value: String },
    NoConsent,
    NoParentalPermission,
}

impl Participation {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Whether the participant is consented for their age and not withdrawn.
pub fn check_participation(row: &FlatRecord) -> Participation {
    if field(row, fields::WITHDRAWAL) == fields::YES {
        return Participation::Withdrawn;
    }

    let raw_age = field(row, fields::AGE);
    if raw_age.is_empty() {
        return Participation::MissingAge;
    }
    let Ok(age) = raw_age.parse::<i64>() else {
        error!(age = raw_age, "age is not a whole number");
        return Participation::InvalidAge {
            value: raw_age.to_owned(),
        };
    };

    if age >= ADULT_AGE && field(row, fields::CONSENT_DATE).is_empty() {
        Participation::NoConsent
    } else if age < ADULT_AGE && field(row, fields::PARENTAL_PERMISSION_DATE).is_empty() {
        Participation::NoParentalPermission
    } else {
        Participation::Active
    }
}

// ---------------------------------------------------------------------------
// Extraction eligibility
// ---------------------------------------------------------------------------

/// The registry columns the extraction phase reads for one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Participant {
    pub identity_id: String,
    pub mrn: String,
    pub date_of_birth: String,
    pub first_name: String,
    pub last_name: String,
    pub status_code: String,
    pub script_output: String,
    pub mrn_queried: String,
    pub dob_queried: String,
    pub instance_queried: String,
}

impl Participant {
    pub fn from_flat(row: usize, flat: &FlatRecord) -> Result<Self, ClinicalError> {
        let identity_id = field(flat, fields::IDENTITY_ID);
        if identity_id.is_empty() {
            return Err(ClinicalError::MissingField {
                row,
                field: fields::IDENTITY_ID.to_owned(),
            });
        }
        let get = |name: &str| field(flat, name).to_owned();
        Ok(Self {
            identity_id: identity_id.to_owned(),
            mrn: get(fields::MRN),
            date_of_birth: get(fields::DATE_OF_BIRTH),
            first_name: get(fields::FIRST_NAME),
            last_name: get(fields::LAST_NAME),
            status_code: get(fields::STATUS),
            // Logs keep their trailing newlines.
            script_output: flat.get(fields::SCRIPT_OUTPUT).cloned().unwrap_or_default(),
            mrn_queried: get(fields::MRN_QUERIED),
            dob_queried: get(fields::DOB_QUERIED),
            instance_queried: get(fields::INSTANCE_QUERIED),
        })
    }

    pub fn status(&self) -> Option<CdeStatus> {
        CdeStatus::from_code(&self.status_code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "reason", rename_all = "snake_case")]
pub enum Eligibility {
    Eligible(&'static str),
    Skip(String),
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible(_))
    }
}

/// Decide whether `participant` should be (re)queried against `instance`.
pub fn extraction_eligibility(
    participant: &Participant,
    participation: &Participation,
    instance: &str,
) -> Eligibility {
    if !participation.is_active() {
        return Eligibility::Skip(format!("not participating: {participation:?}"));
    }
    if participant.mrn.is_empty() || participant.date_of_birth.is_empty() {
        return Eligibility::Skip("MRN or date of birth not entered".into());
    }
    if participant.status_code.is_empty() {
        return Eligibility::Eligible("never extracted");
    }

    let status = participant.status();
    if status == Some(CdeStatus::Completed) {
        return Eligibility::Skip("already completed".into());
    }
    if instance.to_lowercase() > participant.instance_queried.to_lowercase() {
        return Eligibility::Eligible("newer warehouse instance");
    }

    let dob_changed = participant.date_of_birth != participant.dob_queried;
    match status {
        Some(CdeStatus::DobMismatchReviewNeeded) | Some(CdeStatus::DobMismatchDoNotProceed) => {
            if dob_changed {
                Eligibility::Eligible("date of birth updated after mismatch")
            } else {
                Eligibility::Skip("date of birth mismatch awaiting review".into())
            }
        }
        Some(CdeStatus::DobMismatchProceed) => Eligibility::Eligible("mismatch approved"),
        Some(CdeStatus::MrnNotFound) => {
            if participant.mrn != participant.mrn_queried {
                Eligibility::Eligible("MRN updated")
            } else {
                Eligibility::Skip("MRN previously not found and unchanged".into())
            }
        }
        Some(CdeStatus::Completed) | None => {
            error!(
                identity_id = %participant.identity_id,
                status = %participant.status_code,
                "unhandled extraction status"
            );
            Eligibility::Skip(format!("unhandled status '{}'", participant.status_code))
        }
    }
}

// ---------------------------------------------------------------------------
// Upload eligibility
// ---------------------------------------------------------------------------

/// Decide whether extracted variables are ready to copy to the intake store.
pub fn upload_eligibility(row: &FlatRecord, participation: &Participation) -> Eligibility {
    if !participation.is_active() {
        return Eligibility::Skip(format!("not participating: {participation:?}"));
    }
    if CdeStatus::from_code(field(row, fields::STATUS)) != Some(CdeStatus::Completed) {
        return Eligibility::Skip("extraction not completed".into());
    }
    if field(row, fields::LOCAL_COMPLETE) == fields::Complete::Complete.code() {
        return Eligibility::Skip("already uploaded".into());
    }
    match fields::ReviewStatus::from_code(field(row, fields::REVIEW_STATUS)) {
        Some(fields::ReviewStatus::NotNeeded) => Eligibility::Eligible("review not needed"),
        Some(fields::ReviewStatus::Reviewed) => Eligibility::Eligible("review completed"),
        other => {
            error!(
                identity_id = field(row, fields::IDENTITY_ID),
                review_status = ?other,
                "unexpected review status for upload"
            );
            Eligibility::Skip("review pending".into())
        }
    }
}

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabResult {
    pub kind: LabKind,
    pub measurement: Option<Measurement>,
}

/// Ages at the qualifying first and second event of one condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ConditionSummary {
    pub first_age: Option<f64>,
    pub second_age: Option<f64>,
}

impl ConditionSummary {
    /// `events` must be oldest first and already limited to pediatric ages.
    pub fn from_events(events: &[ConditionEvent]) -> Self {
        let Some(first) = events.first() else {
            return Self::default();
        };
        if first.age_years >= EARLY_CHILDHOOD_AGE {
            return Self::default();
        }
        let second = events
            .iter()
            .find(|e| (e.date - first.date).num_days() >= EVENT_SPACING_DAYS)
            .filter(|e| e.age_years < crate::warehouse::PEDIATRIC_AGE_LIMIT);
        Self {
            first_age: Some(first.age_years),
            second_age: second.map(|e| e.age_years),
        }
    }

    pub fn flag(&self) -> bool {
        self.second_age.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClinicalVariables {
    pub labs: Vec<LabResult>,
    pub allergy_count: u32,
    pub wheeze: ConditionSummary,
    pub eczema: ConditionSummary,
}

impl ClinicalVariables {
    /// Query every variable for `person_id`.
    pub fn extract<W: ClinicalWarehouse + ?Sized>(
        warehouse: &W,
        person_id: u64,
    ) -> Result<Self, ClinicalError> {
        let labs = LabKind::ALL
            .iter()
            .map(|&kind| {
                Ok(LabResult {
                    kind,
                    measurement: warehouse.latest_measurement(person_id, kind)?,
                })
            })
            .collect::<Result<Vec<_>, ClinicalError>>()?;
        let allergy_count = warehouse.positive_allergy_tests(person_id)?;
        let wheeze =
            ConditionSummary::from_events(&warehouse.condition_events(person_id, ConditionKind::Wheeze)?);
        let eczema =
            ConditionSummary::from_events(&warehouse.condition_events(person_id, ConditionKind::Eczema)?);
        debug!(person_id, allergy_count, "extracted clinical variables");
        Ok(Self {
            labs,
            allergy_count,
            wheeze,
            eczema,
        })
    }

    pub fn allergy_flag(&self) -> bool {
        self.allergy_count >= ALLERGY_FLAG_THRESHOLD
    }

    fn value(&self, kind: LabKind) -> Option<f64> {
        self.labs
            .iter()
            .find(|l| l.kind == kind)
            .and_then(|l| l.measurement.as_ref())
            .map(|m| m.value)
    }

    /// Labs whose value falls outside its plausibility range, as
    /// `"label [range]"` strings.
    pub fn labs_needing_review(&self) -> Vec<&'static str> {
        let sbp = self.value(LabKind::Sbp);
        let mut out = Vec::new();
        for lab in &self.labs {
            let Some(v) = lab.measurement.as_ref().map(|m| m.value) else {
                continue;
            };
            let flagged = match lab.kind {
                LabKind::Sbp => (!(60.0..=240.0).contains(&v)).then_some("SBP [60-240]"),
                LabKind::Dbp => (v < 0.0 || sbp.is_some_and(|s| v >= s)).then_some("DBP [0-SBP]"),
                LabKind::Hdl => (!(5.0..=200.0).contains(&v)).then_some("HDL [5-200]"),
                LabKind::TotalCholesterol => {
                    (!(50.0..=1000.0).contains(&v)).then_some("total cholesterol [50-1000]")
                }
                LabKind::A1c => (!(2.0..=20.0).contains(&v)).then_some("a1c [2-20]"),
                LabKind::Triglyceride => None,
            };
            out.extend(flagged);
        }
        out
    }

    /// Registry fields for the variables, with missing-value sentinels.
    pub fn to_fields(&self) -> FlatRecord {
        let mut out = FlatRecord::new();
        out.insert(fields::ALLERGY_COUNT.into(), self.allergy_count.to_string());
        out.insert(fields::ALLERGY_FLAG.into(), flag(self.allergy_flag()));

        for lab in &self.labs {
            let [name, date, concept, value] = fields::lab_fields(lab.kind.field_prefix());
            match &lab.measurement {
                Some(m) => {
                    out.insert(name, m.concept_name.clone());
                    out.insert(date, m.date.format("%Y-%m-%d").to_string());
                    out.insert(concept, m.concept_id.to_string());
                    out.insert(value, format_number(m.value));
                }
                None => {
                    out.insert(name, fields::MISSING_CONCEPT_NAME.into());
                    out.insert(date, fields::MISSING_DATE.into());
                    out.insert(value, fields::MISSING_VALUE.to_string());
                }
            }
        }

        for (kind, summary) in [
            (ConditionKind::Wheeze, &self.wheeze),
            (ConditionKind::Eczema, &self.eczema),
        ] {
            let (first, second, flag_field) = fields::condition_fields(kind.field_name());
            out.insert(first, age_or_missing(summary.first_age));
            out.insert(second, age_or_missing(summary.second_age));
            out.insert(flag_field, flag(summary.flag()));
        }
        out
    }
}

fn flag(on: bool) -> String {
    if on { "1" } else { "0" }.to_owned()
}

fn age_or_missing(age: Option<f64>) -> String {
    age.map(format_number)
        .unwrap_or_else(|| fields::MISSING_VALUE.to_string())
}

/// Whole numbers without a trailing `.0`.
pub fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{v:.0}")
    } else {
        v.to_string()
    }
}

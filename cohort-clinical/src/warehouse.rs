//! Clinical warehouse access.
//!
//! [`ClinicalWarehouse`] is the query surface the workflow needs. Concept
//! dictionaries (which measurement and condition codes belong to each lab or
//! condition) live behind the implementation. [`JsonWarehouse`] serves a
//! pre-extracted JSON snapshot in which rows are already labelled by kind.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{io_err, ClinicalError};
use crate::facility::FacilityCode;

/// Days per year used for age-at-event.
const DAYS_PER_YEAR: f64 = 365.24;

/// Condition events at or past this age are ignored.
pub const PEDIATRIC_AGE_LIMIT: f64 = 18.0;

// ---------------------------------------------------------------------------
// Query types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabKind {
    Sbp,
    Dbp,
    Hdl,
    TotalCholesterol,
    Triglyceride,
    A1c,
}

impl LabKind {
    pub const ALL: [LabKind; 6] = [
        LabKind::Sbp,
        LabKind::Dbp,
        LabKind::Hdl,
        LabKind::TotalCholesterol,
        LabKind::Triglyceride,
        LabKind::A1c,
    ];

    /// Registry field-name prefix, e.g. `sbp` in `sbp_value_most_recent_local`.
    pub fn field_prefix(self) -> &'static str {
        match self {
            Self::Sbp => "sbp",
            Self::Dbp => "dbp",
            Self::Hdl => "hdl",
            Self::TotalCholesterol => "totalcholest",
            Self::Triglyceride => "triglyceride",
            Self::A1c => "a1c",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    Wheeze,
    Eczema,
}

impl ConditionKind {
    pub fn field_name(self) -> &'static str {
        match self {
            Self::Wheeze => "wheeze",
            Self::Eczema => "eczema",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehousePerson {
    pub person_id: u64,
    pub birth_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub concept_id: u64,
    pub concept_name: String,
    pub date: NaiveDate,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionEvent {
    pub date: NaiveDate,
    pub age_years: f64,
}

pub trait ClinicalWarehouse {
    /// Every person under `mrn` at `facility`, in warehouse order.
    fn persons_by_mrn(
        &self,
        mrn: &str,
        facility: FacilityCode,
    ) -> Result<Vec<WarehousePerson>, ClinicalError>;

    /// Most recent numeric result for `lab`.
    fn latest_measurement(
        &self,
        person_id: u64,
        lab: LabKind,
    ) -> Result<Option<Measurement>, ClinicalError>;

    /// Number of distinct allergens with a positive test.
    fn positive_allergy_tests(&self, person_id: u64) -> Result<u32, ClinicalError>;

    /// Pediatric events of `kind`, oldest first.
    fn condition_events(
        &self,
        person_id: u64,
        kind: ConditionKind,
    ) -> Result<Vec<ConditionEvent>, ClinicalError>;
}

// ---------------------------------------------------------------------------
// JSON snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
struct Snapshot {
    #[serde(default)]
    persons: Vec<SnapshotPerson>,
}

#[derive(Debug, Clone, Deserialize)]
struct SnapshotPerson {
    person_id: u64,
    mrn: String,
    facility_code: FacilityCode,
    birth_date: NaiveDate,
    #[serde(default)]
    measurements: Vec<SnapshotMeasurement>,
    /// Allergen concept ids with a positive result; repeats count once.
    #[serde(default)]
    positive_allergy_tests: Vec<u64>,
    #[serde(default)]
    conditions: Vec<SnapshotCondition>,
}

#[derive(Debug, Clone, Deserialize)]
struct SnapshotMeasurement {
    lab: LabKind,
    concept_id: u64,
    concept_name: String,
    date: NaiveDate,
    value: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct SnapshotCondition {
    kind: ConditionKind,
    date: NaiveDate,
}

/// Read-only warehouse backed by a JSON snapshot file.
#[derive(Debug, Clone, Default)]
pub struct JsonWarehouse {
    persons: Vec<SnapshotPerson>,
}

impl JsonWarehouse {
    pub fn open(path: &Path) -> Result<Self, ClinicalError> {
        let text = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        let snapshot: Snapshot =
            serde_json::from_str(&text).map_err(|source| ClinicalError::Snapshot {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(path = %path.display(), persons = snapshot.persons.len(), "loaded warehouse snapshot");
        Ok(Self {
            persons: snapshot.persons,
        })
    }

    pub fn len(&self) -> usize {
        self.persons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.persons.is_empty()
    }

    fn person(&self, person_id: u64) -> Result<&SnapshotPerson, ClinicalError> {
        self.persons
            .iter()
            .find(|p| p.person_id == person_id)
            .ok_or_else(|| ClinicalError::Warehouse(format!("unknown person_id {person_id}")))
    }
}

impl ClinicalWarehouse for JsonWarehouse {
    fn persons_by_mrn(
        &self,
        mrn: &str,
        facility: FacilityCode,
    ) -> Result<Vec<WarehousePerson>, ClinicalError> {
        Ok(self
            .persons
            .iter()
            .filter(|p| p.mrn == mrn && p.facility_code == facility)
            .map(|p| WarehousePerson {
                person_id: p.person_id,
                birth_date: p.birth_date,
            })
            .collect())
    }

    fn latest_measurement(
        &self,
        person_id: u64,
        lab: LabKind,
    ) -> Result<Option<Measurement>, ClinicalError> {
        Ok(self
            .person(person_id)?
            .measurements
            .iter()
            .filter(|m| m.lab == lab)
            .max_by_key(|m| m.date)
            .map(|m| Measurement {
                concept_id: m.concept_id,
                concept_name: m.concept_name.clone(),
                date: m.date,
                value: m.value,
            }))
    }

    fn positive_allergy_tests(&self, person_id: u64) -> Result<u32, ClinicalError> {
        let distinct: BTreeSet<u64> = self
            .person(person_id)?
            .positive_allergy_tests
            .iter()
            .copied()
            .collect();
        Ok(distinct.len() as u32)
    }

    fn condition_events(
        &self,
        person_id: u64,
        kind: ConditionKind,
    ) -> Result<Vec<ConditionEvent>, ClinicalError> {
        let person = self.person(person_id)?;
        let mut events: Vec<ConditionEvent> = person
            .conditions
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| ConditionEvent {
                date: c.date,
                age_years: (c.date - person.birth_date).num_days() as f64 / DAYS_PER_YEAR,
            })
            .filter(|e| e.age_years < PEDIATRIC_AGE_LIMIT)
            .collect();
        events.sort_by_key(|e| e.date);
        Ok(events)
    }
}

//! Typed boundary between exported flat rows and domain records.
//!
//! Conversion fails fast: a row missing a mapped column is a schema problem
//! and aborts the run before anything is written.

use crate::error::RecordError;
use crate::fields::{IntakeFieldMap, RegistryFieldMap};
use crate::normalize;
use crate::types::{
    CandidateRecord, ChildFacet, Demographics, FlatRecord, IdentityId, IdentityRecord, RecordId,
};

impl CandidateRecord {
    /// Build a candidate from row `row` of the intake export.
    ///
    /// Name and DOB columns must exist (they may be blank). Lab id, child
    /// and age columns are optional. The DOB is canonicalized to ISO form when
    /// it parses as a date.
    pub fn from_flat(
        row: usize,
        payload: FlatRecord,
        fields: &IntakeFieldMap,
    ) -> Result<Self, RecordError> {
        let source_record_id = RecordId::from(required(&payload, &fields.record_id, row)?);
        let record = source_record_id.to_string();

        let demographics = Demographics {
            lab_id: optional(&payload, &fields.lab_id),
            first_name: required(&payload, &fields.first_name, row)?.to_owned(),
            last_name: required(&payload, &fields.last_name, row)?.to_owned(),
            date_of_birth: normalize::canonical_date(required(
                &payload,
                &fields.date_of_birth,
                row,
            )?),
            child: child_facet(
                &payload,
                &fields.child_first_name,
                &fields.child_last_name,
                &fields.child_date_of_birth,
            ),
            age: parse_age(&payload, &fields.age, row, &record)?,
        };

        let is_repeat_instrument = optional(&payload, &fields.repeat_instance).is_some();

        Ok(Self {
            source_record_id,
            demographics,
            is_repeat_instrument,
            payload,
        })
    }
}

impl IdentityRecord {
    /// Build an index entry from row `row` of the registry export.
    pub fn from_flat(
        row: usize,
        flat: &FlatRecord,
        fields: &RegistryFieldMap,
    ) -> Result<Self, RecordError> {
        let raw_id = required(flat, &fields.identity_id, row)?;
        let source_record_id = RecordId::from(optional(flat, &fields.record_id).unwrap_or_default());
        let record = source_record_id.to_string();

        let identity_id = raw_id
            .trim()
            .parse::<u64>()
            .map(IdentityId)
            .map_err(|_| RecordError::InvalidField {
                row,
                record: record.clone(),
                field: fields.identity_id.clone(),
                value: raw_id.to_owned(),
            })?;

        let demographics = Demographics {
            lab_id: optional(flat, &fields.lab_id),
            first_name: required(flat, &fields.first_name, row)?.to_owned(),
            last_name: required(flat, &fields.last_name, row)?.to_owned(),
            date_of_birth: normalize::canonical_date(required(flat, &fields.date_of_birth, row)?),
            child: child_facet(
                flat,
                &fields.child_first_name,
                &fields.child_last_name,
                &fields.child_date_of_birth,
            ),
            age: parse_age(flat, &fields.age, row, &record)?,
        };

        Ok(Self {
            identity_id,
            source_record_id,
            demographics,
        })
    }
}

/// Parse every row of a registry export.
pub fn identity_records(
    rows: &[FlatRecord],
    fields: &RegistryFieldMap,
) -> Result<Vec<IdentityRecord>, RecordError> {
    rows.iter()
        .enumerate()
        .map(|(i, row)| IdentityRecord::from_flat(i, row, fields))
        .collect()
}

/// Parse every row of an intake export.
pub fn candidate_records(
    rows: Vec<FlatRecord>,
    fields: &IntakeFieldMap,
) -> Result<Vec<CandidateRecord>, RecordError> {
    rows.into_iter()
        .enumerate()
        .map(|(i, row)| CandidateRecord::from_flat(i, row, fields))
        .collect()
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn required<'a>(flat: &'a FlatRecord, field: &str, row: usize) -> Result<&'a str, RecordError> {
    flat.get(field)
        .map(String::as_str)
        .ok_or_else(|| RecordError::MissingField {
            row,
            field: field.to_owned(),
        })
}

fn optional(flat: &FlatRecord, field: &str) -> Option<String> {
    flat.get(field)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

fn child_facet(flat: &FlatRecord, first: &str, last: &str, dob: &str) -> Option<ChildFacet> {
    let facet = ChildFacet {
        first_name: optional(flat, first).unwrap_or_default(),
        last_name: optional(flat, last).unwrap_or_default(),
        date_of_birth: optional(flat, dob)
            .map(|d| normalize::canonical_date(&d))
            .unwrap_or_default(),
    };
    if facet.first_name.is_empty() && facet.last_name.is_empty() && facet.date_of_birth.is_empty()
    {
        None
    } else {
        Some(facet)
    }
}

/// Ages are exported as integers or as calculated decimals ("12.4").
fn parse_age(
    flat: &FlatRecord,
    field: &str,
    row: usize,
    record: &str,
) -> Result<Option<u32>, RecordError> {
    let Some(raw) = optional(flat, field) else {
        return Ok(None);
    };
    if let Ok(age) = raw.parse::<u32>() {
        return Ok(Some(age));
    }
    match raw.parse::<f64>() {
        Ok(age) if age.is_finite() && age >= 0.0 && age < f64::from(u32::MAX) => {
            Ok(Some(age.floor() as u32))
        }
        _ => Err(RecordError::InvalidField {
            row,
            record: record.to_owned(),
            field: field.to_owned(),
            value: raw,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> FlatRecord {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn intake_row() -> FlatRecord {
        row(&[
            ("record_id", "R2"),
            ("participant_lab_id", ""),
            ("first_name", "John"),
            ("last_name", "Smith"),
            ("date_of_birth", "02/03/1990"),
            ("first_name_child", ""),
            ("last_name_child", ""),
            ("date_of_birth_child", ""),
            ("age", "34"),
            ("redcap_repeat_instance", ""),
        ])
    }

    #[test]
    fn candidate_parses_and_canonicalizes_dob() {
        let c = CandidateRecord::from_flat(0, intake_row(), &IntakeFieldMap::default())
            .expect("valid row");
        assert_eq!(c.source_record_id, RecordId::from("R2"));
        assert_eq!(c.demographics.date_of_birth, "1990-02-03");
        assert_eq!(c.demographics.lab_id, None);
        assert_eq!(c.demographics.child, None);
        assert_eq!(c.demographics.age, Some(34));
        assert!(!c.is_repeat_instrument);
        assert_eq!(c.payload.get("date_of_birth").map(String::as_str), Some("02/03/1990"));
    }

    #[test]
    fn repeat_instance_marks_repeat_instrument() {
        let mut r = intake_row();
        r.insert("redcap_repeat_instance".into(), "2".into());
        let c = CandidateRecord::from_flat(0, r, &IntakeFieldMap::default()).expect("valid row");
        assert!(c.is_repeat_instrument);
    }

    #[test]
    fn decimal_age_is_floored() {
        let mut r = intake_row();
        r.insert("age".into(), "12.7".into());
        let c = CandidateRecord::from_flat(0, r, &IntakeFieldMap::default()).expect("valid row");
        assert_eq!(c.demographics.age, Some(12));
    }

    #[test]
    fn missing_name_column_fails_fast() {
        let mut r = intake_row();
        r.remove("first_name");
        let err = CandidateRecord::from_flat(3, r, &IntakeFieldMap::default()).unwrap_err();
        assert_eq!(
            err,
            RecordError::MissingField {
                row: 3,
                field: "first_name".into()
            }
        );
    }

    #[test]
    fn garbage_age_is_invalid() {
        let mut r = intake_row();
        r.insert("age".into(), "adult".into());
        let err = CandidateRecord::from_flat(0, r, &IntakeFieldMap::default()).unwrap_err();
        assert!(matches!(err, RecordError::InvalidField { ref field, .. } if field == "age"));
    }

    #[test]
    fn registry_row_requires_numeric_identity() {
        let fields = RegistryFieldMap::default();
        let ok = row(&[
            ("cuimc_id", "7"),
            ("record_id", "R1"),
            ("first_local", "Jane"),
            ("last_local", "Doe"),
            ("dob", "1980-01-01"),
        ]);
        let rec = IdentityRecord::from_flat(0, &ok, &fields).expect("valid");
        assert_eq!(rec.identity_id, IdentityId(7));

        let mut bad = ok.clone();
        bad.insert("cuimc_id".into(), "seven".into());
        assert!(matches!(
            IdentityRecord::from_flat(0, &bad, &fields),
            Err(RecordError::InvalidField { .. })
        ));
    }

    #[test]
    fn child_facet_present_when_any_child_value_set() {
        let fields = RegistryFieldMap::default();
        let r = row(&[
            ("cuimc_id", "11"),
            ("first_local", "Ann"),
            ("last_local", "Lee"),
            ("dob", "1985-05-05"),
            ("child_first", "Max"),
        ]);
        let rec = IdentityRecord::from_flat(0, &r, &fields).expect("valid");
        let child = rec.demographics.child.expect("child facet");
        assert_eq!(child.first_name, "Max");
        assert_eq!(child.date_of_birth, "");
    }
}

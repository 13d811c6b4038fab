//! Comparison keys derived from raw demographics.
//!
//! Keys are trimmed and lower-cased. Dates written `MM/DD/YYYY` or
//! `YYYY-MM-DD` are canonicalized to ISO form so both registries compare
//! equal. An empty key never matches anything, including another empty key.

use chrono::NaiveDate;

use crate::types::Demographics;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// `(first, last, dob)` after normalization.
pub type NameDobKey = (String, String, String);

/// Normalized projection of a [`Demographics`] value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NormalizedKeys {
    pub lab_id: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: String,
    pub child_first_name: String,
    pub child_last_name: String,
    pub child_date_of_birth: String,
}

impl NormalizedKeys {
    pub fn lab_key(&self) -> Option<&str> {
        (!self.lab_id.is_empty()).then_some(self.lab_id.as_str())
    }

    /// The adult name/DOB triple, if every part is non-empty.
    pub fn adult_key(&self) -> Option<NameDobKey> {
        triple(&self.first_name, &self.last_name, &self.date_of_birth)
    }

    /// The dependent name/DOB triple, if every part is non-empty.
    pub fn child_key(&self) -> Option<NameDobKey> {
        triple(
            &self.child_first_name,
            &self.child_last_name,
            &self.child_date_of_birth,
        )
    }
}

pub fn project(d: &Demographics) -> NormalizedKeys {
    let child = d.child.as_ref();
    NormalizedKeys {
        lab_id: d.lab_id.as_deref().map(normalize_text).unwrap_or_default(),
        first_name: normalize_text(&d.first_name),
        last_name: normalize_text(&d.last_name),
        date_of_birth: normalize_date(&d.date_of_birth),
        child_first_name: child.map(|c| normalize_text(&c.first_name)).unwrap_or_default(),
        child_last_name: child.map(|c| normalize_text(&c.last_name)).unwrap_or_default(),
        child_date_of_birth: child
            .map(|c| normalize_date(&c.date_of_birth))
            .unwrap_or_default(),
    }
}

pub fn normalize_text(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub fn normalize_date(raw: &str) -> String {
    canonical_date(raw).to_lowercase()
}

/// ISO form of `raw` if it parses as a date, otherwise `raw` trimmed.
pub fn canonical_date(raw: &str) -> String {
    let trimmed = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| trimmed.to_owned())
}

/// Equality over normalized keys where empty never matches.
pub fn keys_equal(a: &str, b: &str) -> bool {
    !a.is_empty() && a == b
}

/// At least one alphabetic character.
///
/// Child name columns on adult rows often hold placeholders like `"."` or
/// `"0"`; those do not make the row a dependent enrollment.
pub fn is_legal_name(raw: &str) -> bool {
    raw.chars().any(char::is_alphabetic)
}

fn triple(first: &str, last: &str, dob: &str) -> Option<NameDobKey> {
    if first.is_empty() || last.is_empty() || dob.is_empty() {
        return None;
    }
    Some((first.to_owned(), last.to_owned(), dob.to_owned()))
}

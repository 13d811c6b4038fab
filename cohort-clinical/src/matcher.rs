//! MRN + date-of-birth matching against the clinical warehouse.

use chrono::NaiveDate;
use serde::Serialize;
use similar::TextDiff;
use tracing::debug;

use crate::error::ClinicalError;
use crate::facility::FacilityCode;
use crate::warehouse::{ClinicalWarehouse, WarehousePerson};

/// Best warehouse person for an MRN and how closely the birth date agrees.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchOutcome {
    pub person: Option<WarehousePerson>,
    /// 1.0 on an exact birth-date match, 0.0 when nothing matched.
    pub similarity: f64,
}

impl MatchOutcome {
    pub fn none() -> Self {
        Self {
            person: None,
            similarity: 0.0,
        }
    }

    pub fn is_exact(&self) -> bool {
        self.person.is_some() && self.similarity >= 1.0
    }

    /// A match below 1.0 needs a human unless `override_approved`.
    pub fn requires_review(&self, override_approved: bool) -> bool {
        self.person.is_some() && !self.is_exact() && !override_approved
    }
}

/// Similarity of two birth dates as written `YYYY-MM-DD`.
pub fn dob_similarity(a: NaiveDate, b: NaiveDate) -> f64 {
    let a = a.format("%Y-%m-%d").to_string();
    let b = b.format("%Y-%m-%d").to_string();
    f64::from(TextDiff::from_chars(a.as_str(), b.as_str()).ratio())
}

pub struct FuzzyClinicalMatcher<'a, W: ?Sized> {
    warehouse: &'a W,
}

impl<'a, W: ClinicalWarehouse + ?Sized> FuzzyClinicalMatcher<'a, W> {
    pub fn new(warehouse: &'a W) -> Self {
        Self { warehouse }
    }

    /// Find the warehouse person for `mrn` whose birth date is closest to
    /// `claimed_dob`.
    ///
    /// An exact birth date wins immediately. Otherwise the highest
    /// similarity wins and ties go to the first candidate in warehouse order.
    /// MRNs with an unrecognized format yield no match.
    pub fn find_closest(
        &self,
        mrn: &str,
        claimed_dob: NaiveDate,
    ) -> Result<MatchOutcome, ClinicalError> {
        let mrn = mrn.trim();
        let Some(facility) = FacilityCode::from_mrn(mrn) else {
            return Ok(MatchOutcome::none());
        };

        let candidates = self.warehouse.persons_by_mrn(mrn, facility)?;
        if candidates.is_empty() {
            debug!(%mrn, %facility, "no warehouse persons for MRN");
            return Ok(MatchOutcome::none());
        }

        let mut best = MatchOutcome::none();
        for person in candidates {
            if person.birth_date == claimed_dob {
                debug!(%mrn, person_id = person.person_id, "exact birth date match");
                return Ok(MatchOutcome {
                    person: Some(person),
                    similarity: 1.0,
                });
            }
            let score = dob_similarity(person.birth_date, claimed_dob);
            if score > best.similarity {
                best = MatchOutcome {
                    person: Some(person),
                    similarity: score,
                };
            }
        }

        debug!(
            %mrn,
            person_id = best.person.as_ref().map(|p| p.person_id),
            similarity = best.similarity,
            "closest birth date"
        );
        Ok(best)
    }
}

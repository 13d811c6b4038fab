//! Ordered-fallback identity resolution.
//!
//! A candidate is matched against, in order:
//!
//! 1. identifiers already assigned earlier in the same batch
//! 2. the registry's stored intake record id
//! 3. the laboratory identifier
//! 4. name + date of birth, on the adult or dependent facet
//!
//! and only when all of those miss is a new identifier minted. The first
//! hit wins.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ResolveError;
use crate::index::IdentityIndex;
use crate::minter::{self, DEFAULT_RESERVED_THRESHOLD};
use crate::normalize;
use crate::types::{CandidateRecord, IdentityId, MatchedBy, RecordId, ResolutionResult};

/// Which name/DOB facets take part in step 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FacetPolicy {
    pub adult: bool,
    pub child: bool,
}

impl Default for FacetPolicy {
    fn default() -> Self {
        Self {
            adult: true,
            child: true,
        }
    }
}

/// Tunables for [`IdentityResolver`]; the `identity:` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub reserved_threshold: u64,
    /// Candidates younger than this resolve on the dependent facet.
    pub adult_age: u32,
    pub facets: FacetPolicy,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            reserved_threshold: DEFAULT_RESERVED_THRESHOLD,
            adult_age: 18,
            facets: FacetPolicy::default(),
        }
    }
}

/// Per-run state: every identifier handed out so far and the minting
/// high-water mark. One instance lives for one batch and is dropped after.
#[derive(Debug, Clone, Default)]
pub struct BatchState {
    assigned: HashMap<RecordId, IdentityId>,
    high_water_mark: u64,
}

impl BatchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity_for(&self, record_id: &RecordId) -> Option<IdentityId> {
        if record_id.is_empty() {
            return None;
        }
        self.assigned
            .get(&RecordId::from(record_id.as_str()))
            .copied()
    }

    pub fn high_water_mark(&self) -> u64 {
        self.high_water_mark
    }

    pub fn len(&self) -> usize {
        self.assigned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }

    fn remember(&mut self, record_id: &RecordId, identity: IdentityId) {
        if record_id.is_empty() {
            return;
        }
        self.assigned
            .entry(RecordId::from(record_id.as_str()))
            .or_insert(identity);
    }
}

pub struct IdentityResolver<'a> {
    index: &'a IdentityIndex,
    config: ResolverConfig,
    registry_high_water_mark: u64,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(index: &'a IdentityIndex, config: ResolverConfig) -> Self {
        let registry_high_water_mark = index.max_identity_id_below(config.reserved_threshold);
        Self {
            index,
            config,
            registry_high_water_mark,
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Current minting floor: the registry maximum or the last id minted in
    /// `batch`, whichever is larger.
    pub fn high_water_mark(&self, batch: &BatchState) -> u64 {
        batch.high_water_mark.max(self.registry_high_water_mark)
    }

    /// Resolve one candidate, updating `batch` on success.
    ///
    /// Candidates must be fed in export order so that a repeat instrument
    /// follows its parent record.
    pub fn resolve(
        &self,
        candidate: &CandidateRecord,
        batch: &mut BatchState,
    ) -> Result<ResolutionResult, ResolveError> {
        let result = match self.lookup(candidate, batch)? {
            Some(found) => found,
            None => {
                let id = minter::next_identity_id(
                    self.high_water_mark(batch),
                    self.config.reserved_threshold,
                )?;
                batch.high_water_mark = id.0;
                info!(record = %candidate.source_record_id, identity = %id, "minted new identifier");
                ResolutionResult::minted(id)
            }
        };
        batch.remember(&candidate.source_record_id, result.identity_id);
        Ok(result)
    }

    fn lookup(
        &self,
        candidate: &CandidateRecord,
        batch: &BatchState,
    ) -> Result<Option<ResolutionResult>, ResolveError> {
        let record_id = &candidate.source_record_id;

        if let Some(id) = batch.identity_for(record_id) {
            debug!(record = %record_id, identity = %id, repeat = candidate.is_repeat_instrument, "reused batch assignment");
            return Ok(Some(ResolutionResult::matched(id, MatchedBy::RecordId)));
        }

        if !record_id.is_empty() {
            if let Some(hit) = self.index.by_record_id(record_id.as_str()) {
                return Ok(Some(ResolutionResult::matched(hit.identity_id, MatchedBy::RecordId)));
            }
        }

        let keys = normalize::project(&candidate.demographics);

        if let Some(lab) = keys.lab_key() {
            if let Some(hit) = self.index.by_lab_id(lab) {
                return Ok(Some(ResolutionResult::matched(hit.identity_id, MatchedBy::LabId)));
            }
        }

        let insufficient = || ResolveError::InsufficientIdentityData {
            record: record_id.clone(),
        };

        let (first, last, dob) = keys.adult_key().ok_or_else(insufficient)?;

        let is_minor = matches!(candidate.demographics.age, Some(age) if age < self.config.adult_age);
        if is_minor {
            let (c_first, c_last, c_dob) = keys.child_key().ok_or_else(insufficient)?;
            if self.config.facets.child {
                if let Some(hit) = self.index.by_child_name_dob(&c_first, &c_last, &c_dob) {
                    return Ok(Some(ResolutionResult::matched(
                        hit.identity_id,
                        MatchedBy::NameDobChild,
                    )));
                }
            }
        } else if self.config.facets.adult {
            if let Some(hit) = self.index.by_adult_name_dob(&first, &last, &dob) {
                return Ok(Some(ResolutionResult::matched(
                    hit.identity_id,
                    MatchedBy::NameDobAdult,
                )));
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Demographics, IdentityRecord};

    fn registry() -> IdentityIndex {
        IdentityIndex::build(vec![IdentityRecord {
            identity_id: IdentityId(7),
            source_record_id: RecordId::from("R1"),
            demographics: Demographics {
                lab_id: Some("LAB-1".into()),
                first_name: "Jane".into(),
                last_name: "Doe".into(),
                date_of_birth: "1980-01-01".into(),
                ..Default::default()
            },
        }])
    }

    fn candidate(rid: &str, first: &str, last: &str, dob: &str) -> CandidateRecord {
        CandidateRecord {
            source_record_id: RecordId::from(rid),
            demographics: Demographics {
                first_name: first.into(),
                last_name: last.into(),
                date_of_birth: dob.into(),
                ..Default::default()
            },
            is_repeat_instrument: false,
            payload: Default::default(),
        }
    }

    #[test]
    fn record_id_outranks_demographics() {
        let idx = registry();
        let resolver = IdentityResolver::new(&idx, ResolverConfig::default());
        let mut batch = BatchState::new();
        let r = resolver
            .resolve(&candidate("R1", "Someone", "Else", "2000-01-01"), &mut batch)
            .expect("resolves");
        assert_eq!(r, ResolutionResult::matched(IdentityId(7), MatchedBy::RecordId));
    }

    #[test]
    fn lab_id_match() {
        let idx = registry();
        let resolver = IdentityResolver::new(&idx, ResolverConfig::default());
        let mut c = candidate("R5", "", "", "");
        c.demographics.lab_id = Some(" lab-1 ".into());
        let r = resolver.resolve(&c, &mut BatchState::new()).expect("resolves");
        assert_eq!(r.matched_by, MatchedBy::LabId);
    }

    #[test]
    fn disabled_adult_facet_mints() {
        let idx = registry();
        let config = ResolverConfig {
            facets: FacetPolicy {
                adult: false,
                child: true,
            },
            ..Default::default()
        };
        let resolver = IdentityResolver::new(&idx, config);
        let r = resolver
            .resolve(&candidate("R9", "jane", "doe", "1980-01-01"), &mut BatchState::new())
            .expect("resolves");
        assert!(r.is_new);
        assert_eq!(r.identity_id, IdentityId(8));
    }

    #[test]
    fn minor_without_child_facet_is_insufficient() {
        let idx = registry();
        let resolver = IdentityResolver::new(&idx, ResolverConfig::default());
        // Adult triple is an exact registry hit; a minor must not fall through to it.
        let mut c = candidate("R9", "Jane", "Doe", "1980-01-01");
        c.demographics.age = Some(10);
        assert!(matches!(
            resolver.resolve(&c, &mut BatchState::new()),
            Err(ResolveError::InsufficientIdentityData { .. })
        ));
    }

    #[test]
    fn failed_candidate_leaves_batch_untouched() {
        let idx = registry();
        let resolver = IdentityResolver::new(&idx, ResolverConfig::default());
        let mut batch = BatchState::new();
        let _ = resolver.resolve(&candidate("R3", "", "", ""), &mut batch);
        assert!(batch.is_empty());
        assert_eq!(batch.high_water_mark(), 0);
    }
}

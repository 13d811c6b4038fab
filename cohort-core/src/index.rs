//! In-memory lookup index over the authoritative registry.
//!
//! Built once per run from a full registry export and never mutated. All
//! lookups are O(1) hash probes over normalized keys. When two registry rows
//! share a key the first row in export order wins.

use std::collections::HashMap;

use tracing::debug;

use crate::error::RecordError;
use crate::fields::RegistryFieldMap;
use crate::normalize::{self, NameDobKey};
use crate::record;
use crate::types::{FlatRecord, IdentityRecord};

#[derive(Debug, Default)]
pub struct IdentityIndex {
    records: Vec<IdentityRecord>,
    by_record_id: HashMap<String, usize>,
    by_lab_id: HashMap<String, usize>,
    by_adult: HashMap<NameDobKey, usize>,
    by_child: HashMap<NameDobKey, usize>,
}

impl IdentityIndex {
    pub fn build(records: Vec<IdentityRecord>) -> Self {
        let mut index = Self {
            records,
            ..Default::default()
        };

        for (pos, rec) in index.records.iter().enumerate() {
            if !rec.source_record_id.is_empty() {
                insert_first(
                    &mut index.by_record_id,
                    rec.source_record_id.as_str().to_owned(),
                    pos,
                    "record_id",
                );
            }

            let keys = normalize::project(&rec.demographics);
            if let Some(lab) = keys.lab_key() {
                insert_first(&mut index.by_lab_id, lab.to_owned(), pos, "lab_id");
            }
            if is_adult_row(rec) {
                if let Some(key) = keys.adult_key() {
                    insert_first(&mut index.by_adult, key, pos, "adult name/dob");
                }
            }
            if has_child_names(rec) {
                if let Some(key) = keys.child_key() {
                    insert_first(&mut index.by_child, key, pos, "child name/dob");
                }
            }
        }

        debug!(
            records = index.records.len(),
            record_ids = index.by_record_id.len(),
            lab_ids = index.by_lab_id.len(),
            adults = index.by_adult.len(),
            children = index.by_child.len(),
            "identity index built"
        );
        index
    }

    /// Parse a registry export and index it.
    pub fn from_export(
        rows: &[FlatRecord],
        fields: &RegistryFieldMap,
    ) -> Result<Self, RecordError> {
        Ok(Self::build(record::identity_records(rows, fields)?))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[IdentityRecord] {
        &self.records
    }

    pub fn by_record_id(&self, record_id: &str) -> Option<&IdentityRecord> {
        self.get(&self.by_record_id, record_id.trim())
    }

    pub fn by_lab_id(&self, lab_id: &str) -> Option<&IdentityRecord> {
        self.get(&self.by_lab_id, &normalize::normalize_text(lab_id))
    }

    pub fn by_adult_name_dob(&self, first: &str, last: &str, dob: &str) -> Option<&IdentityRecord> {
        let key = name_dob_key(first, last, dob)?;
        self.by_adult.get(&key).map(|&i| &self.records[i])
    }

    pub fn by_child_name_dob(&self, first: &str, last: &str, dob: &str) -> Option<&IdentityRecord> {
        let key = name_dob_key(first, last, dob)?;
        self.by_child.get(&key).map(|&i| &self.records[i])
    }

    /// Largest identifier strictly below `threshold`, or 0 when none.
    pub fn max_identity_id_below(&self, threshold: u64) -> u64 {
        self.records
            .iter()
            .map(|r| r.identity_id.0)
            .filter(|&id| id < threshold)
            .max()
            .unwrap_or(0)
    }

    fn get(&self, map: &HashMap<String, usize>, key: &str) -> Option<&IdentityRecord> {
        if key.is_empty() {
            return None;
        }
        map.get(key).map(|&i| &self.records[i])
    }
}

/// A registry row is an adult enrollment unless a child name column holds
/// a real name.
fn is_adult_row(rec: &IdentityRecord) -> bool {
    match &rec.demographics.child {
        None => true,
        Some(c) => !normalize::is_legal_name(&c.first_name) && !normalize::is_legal_name(&c.last_name),
    }
}

/// Placeholder child names ("." and the like) never form a child key.
fn has_child_names(rec: &IdentityRecord) -> bool {
    rec.demographics.child.as_ref().is_some_and(|c| {
        normalize::is_legal_name(&c.first_name) && normalize::is_legal_name(&c.last_name)
    })
}

fn name_dob_key(first: &str, last: &str, dob: &str) -> Option<NameDobKey> {
    let key = (
        normalize::normalize_text(first),
        normalize::normalize_text(last),
        normalize::normalize_date(dob),
    );
    if key.0.is_empty() || key.1.is_empty() || key.2.is_empty() {
        return None;
    }
    Some(key)
}

fn insert_first<K>(map: &mut HashMap<K, usize>, key: K, pos: usize, what: &str)
where
    K: std::hash::Hash + Eq + std::fmt::Debug,
{
    if let Some(&existing) = map.get(&key) {
        debug!(?key, kept = existing, ignored = pos, "duplicate {what} key in registry");
        return;
    }
    map.insert(key, pos);
}

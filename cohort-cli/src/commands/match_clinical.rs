//! `cohort match-clinical`: look up one participant in the warehouse.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Args;
use colored::Colorize;

use cohort_clinical::{FacilityCode, FuzzyClinicalMatcher, JsonWarehouse};
use cohort_core::normalize::canonical_date;

use crate::output;
use crate::GlobalArgs;

/// Arguments for `cohort match-clinical`.
#[derive(Args, Debug)]
pub struct MatchClinicalArgs {
    /// Warehouse snapshot (JSON).
    #[arg(long)]
    pub warehouse: PathBuf,

    /// Medical record number.
    #[arg(long)]
    pub mrn: String,

    /// Claimed date of birth, `YYYY-MM-DD` or `MM/DD/YYYY`.
    #[arg(long)]
    pub dob: String,
}

impl MatchClinicalArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let dob = NaiveDate::parse_from_str(&canonical_date(&self.dob), "%Y-%m-%d")
            .with_context(|| format!("invalid date of birth '{}'", self.dob))?;
        let warehouse = JsonWarehouse::open(&self.warehouse)
            .with_context(|| format!("failed to open warehouse {}", self.warehouse.display()))?;

        let outcome = FuzzyClinicalMatcher::new(&warehouse)
            .find_closest(&self.mrn, dob)
            .context("warehouse lookup failed")?;

        if global.json {
            return output::print_json(&outcome);
        }

        let facility = FacilityCode::from_mrn(&self.mrn)
            .map(|f| f.to_string())
            .unwrap_or_else(|| "unrecognized".into());
        match &outcome.person {
            None => println!("{} MRN {} (facility {facility}): no match", "✗".red(), self.mrn),
            Some(person) if outcome.is_exact() => println!(
                "{} person {} born {} (exact)",
                "✓".green(),
                person.person_id,
                person.birth_date
            ),
            Some(person) => println!(
                "{} person {} born {} (similarity {:.2}, review needed)",
                "~".yellow(),
                person.person_id,
                person.birth_date,
                outcome.similarity
            ),
        }
        Ok(())
    }
}

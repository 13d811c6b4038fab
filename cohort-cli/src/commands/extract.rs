//! `cohort extract`: pull clinical variables for eligible participants.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use cohort_clinical::{ClinicalOptions, ExtractionWorkflow, JsonWarehouse};
use cohort_sync::RetryPolicy;

use crate::commands::run_timestamp;
use crate::http::RedcapClient;
use crate::output;
use crate::GlobalArgs;

/// Arguments for `cohort extract`.
#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// Warehouse snapshot (JSON).
    #[arg(long)]
    pub warehouse: PathBuf,

    /// Name of the warehouse instance, recorded with each query.
    #[arg(long)]
    pub instance: String,

    /// Query the warehouse but write nothing back.
    #[arg(long)]
    pub dry_run: bool,
}

impl ExtractArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let config = global.load_config()?;
        let warehouse = JsonWarehouse::open(&self.warehouse)
            .with_context(|| format!("failed to open warehouse {}", self.warehouse.display()))?;
        let registry = RedcapClient::new("registry", &config.local);

        let options = ClinicalOptions {
            instance: self.instance,
            retry: RetryPolicy::new(config.retry.max_attempts),
            dry_run: self.dry_run,
            timestamp: run_timestamp(),
        };
        let report = ExtractionWorkflow::new(&registry, &warehouse, options)
            .run()
            .context("clinical extraction failed")?;

        if global.json {
            output::print_json(&report)
        } else {
            output::print_clinical_report(&report);
            Ok(())
        }
    }
}

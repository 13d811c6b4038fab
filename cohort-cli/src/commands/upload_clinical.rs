//! `cohort upload-clinical`: copy completed variables to the intake system.

use anyhow::{Context, Result};
use clap::Args;

use cohort_clinical::{ClinicalOptions, UploadWorkflow};
use cohort_sync::RetryPolicy;

use crate::commands::{remote_endpoint, run_timestamp};
use crate::http::RedcapClient;
use crate::output;
use crate::GlobalArgs;

/// Arguments for `cohort upload-clinical`.
#[derive(Args, Debug)]
pub struct UploadClinicalArgs {
    /// List eligible participants without uploading.
    #[arg(long)]
    pub dry_run: bool,
}

impl UploadClinicalArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let config = global.load_config()?;
        let registry = RedcapClient::new("registry", &config.local);
        let intake = RedcapClient::new("intake", remote_endpoint(&config)?);

        let options = ClinicalOptions {
            instance: String::new(),
            retry: RetryPolicy::new(config.retry.max_attempts),
            dry_run: self.dry_run,
            timestamp: run_timestamp(),
        };
        let report = UploadWorkflow::new(&registry, &intake, options)
            .run()
            .context("clinical upload failed")?;

        if global.json {
            output::print_json(&report)
        } else {
            output::print_clinical_report(&report);
            Ok(())
        }
    }
}

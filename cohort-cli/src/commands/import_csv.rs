//! `cohort import-csv`: add a staff CSV batch to the registry.
//!
//! Only participants the registry does not already hold are written; every
//! other row lands in `<file>.rejected.csv` with the reason.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use cohort_sync::{CsvIntake, PipelineOptions, SyncPipeline};

use crate::http::RedcapClient;
use crate::output;
use crate::GlobalArgs;

/// Arguments for `cohort import-csv`.
#[derive(Args, Debug)]
pub struct ImportCsvArgs {
    /// CSV file with one candidate record per row.
    pub file: PathBuf,

    /// Resolve and clean every row without writing anything.
    #[arg(long)]
    pub dry_run: bool,
}

impl ImportCsvArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let config = global.load_config()?;
        let batch = CsvIntake::open(&self.file)
            .with_context(|| format!("failed to read batch {}", self.file.display()))?;
        let registry = RedcapClient::new("registry", &config.local).keep_existing_values();

        let options = PipelineOptions::batch_upload(&config, self.dry_run);
        let report = SyncPipeline::new(&batch, &registry, options)
            .run()
            .with_context(|| format!("import of {} failed", self.file.display()))?;

        let rejected = if self.dry_run {
            None
        } else {
            batch
                .write_rejected(&report)
                .context("failed to write rejected rows")?
        };

        if global.json {
            return output::print_json(&report);
        }
        output::print_sync_report(&self.file.display().to_string(), &report);
        if let Some(path) = rejected {
            println!("Rejected rows written to {}", path.display());
        }
        Ok(())
    }
}

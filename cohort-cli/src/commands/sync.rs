//! `cohort sync`: reconcile the intake system into the registry.

use anyhow::{Context, Result};
use clap::Args;

use cohort_sync::{PipelineOptions, SyncPipeline};

use crate::commands::remote_endpoint;
use crate::http::RedcapClient;
use crate::output;
use crate::GlobalArgs;

/// Arguments for `cohort sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Resolve and clean every record without writing anything.
    #[arg(long)]
    pub dry_run: bool,
}

impl SyncArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let config = global.load_config()?;
        let intake = RedcapClient::new("intake", remote_endpoint(&config)?);
        let registry = RedcapClient::new("registry", &config.local);

        let options = PipelineOptions::from_config(&config, self.dry_run);
        let report = SyncPipeline::new(&intake, &registry, options)
            .run()
            .context("sync failed")?;

        if global.json {
            output::print_json(&report)
        } else {
            output::print_sync_report("intake", &report);
            Ok(())
        }
    }
}

pub mod extract;
pub mod import_csv;
pub mod match_clinical;
pub mod sync;
pub mod upload_clinical;

use anyhow::{Context, Result};
use cohort_core::config::EndpointConfig;
use cohort_core::Config;

/// The intake endpoint, which only some commands need.
pub(crate) fn remote_endpoint(config: &Config) -> Result<&EndpointConfig> {
    config
        .remote
        .as_ref()
        .context("config has no `remote` endpoint; add one to reach the intake system")
}

/// Timestamp stamped into registry script logs.
pub(crate) fn run_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

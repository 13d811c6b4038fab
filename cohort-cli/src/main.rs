//! Cohort: participant identity resolution and registry sync.
//!
//! # Usage
//!
//! ```text
//! cohort sync [--dry-run]
//! cohort import-csv <file> [--dry-run]
//! cohort match-clinical --warehouse <json> --mrn <mrn> --dob <date>
//! cohort extract --warehouse <json> --instance <name> [--dry-run]
//! cohort upload-clinical [--dry-run]
//! ```
//!
//! Global flags: `--config <path>`, `--json`, `--log-file <path>`.

mod commands;
mod http;
mod logging;
mod output;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use cohort_core::{config, Config};
use commands::{
    extract::ExtractArgs, import_csv::ImportCsvArgs, match_clinical::MatchClinicalArgs,
    sync::SyncArgs, upload_clinical::UploadClinicalArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "cohort",
    version,
    about = "Resolve participant identities and keep registries in sync",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Config file (default: ~/.cohort/config.yaml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit machine-readable JSON instead of tables.
    #[arg(long, global = true)]
    pub json: bool,

    /// Also append plain-text logs to this file.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

impl GlobalArgs {
    pub fn load_config(&self) -> Result<Config> {
        match &self.config {
            Some(path) => config::load_at(path)
                .with_context(|| format!("failed to load config {}", path.display())),
            None => config::load().context("failed to load config"),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Pull new intake records, resolve identities and push them to the registry.
    Sync(SyncArgs),

    /// Run the sync pipeline against a CSV batch instead of the intake system.
    ImportCsv(ImportCsvArgs),

    /// Show the closest warehouse person for an MRN and date of birth.
    MatchClinical(MatchClinicalArgs),

    /// Extract clinical variables for eligible participants.
    Extract(ExtractArgs),

    /// Copy completed clinical variables to the intake system.
    UploadClinical(UploadClinicalArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.global.log_file.as_deref())?;
    match cli.command {
        Commands::Sync(args) => args.run(&cli.global),
        Commands::ImportCsv(args) => args.run(&cli.global),
        Commands::MatchClinical(args) => args.run(&cli.global),
        Commands::Extract(args) => args.run(&cli.global),
        Commands::UploadClinical(args) => args.run(&cli.global),
    }
}

//! Console rendering of run reports.

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use cohort_clinical::{Action, ClinicalReport, Phase, WriteStatus};
use cohort_sync::{RecordState, SyncReport};

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize report JSON")?
    );
    Ok(())
}

fn separator() -> String {
    "■".repeat(67).bright_black().to_string()
}

// ----- 1. Sync report -----

#[derive(Tabled)]
struct SyncRow {
    #[tabled(rename = "row")]
    row: usize,
    #[tabled(rename = "record id")]
    record_id: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "identity")]
    identity: String,
    #[tabled(rename = "matched by")]
    matched_by: String,
    #[tabled(rename = "detail")]
    detail: String,
}

pub fn print_sync_report(source: &str, report: &SyncReport) {
    let prefix = if report.dry_run { "[dry-run] " } else { "" };
    let c = &report.counts;

    if report.outcomes.is_empty() {
        println!("{prefix}✓ '{source}': nothing to do");
        return;
    }

    let rows: Vec<SyncRow> = report
        .outcomes
        .iter()
        .map(|o| SyncRow {
            row: o.row,
            record_id: o.source_record_id.to_string(),
            state: state_label(o.state),
            identity: o
                .resolution
                .map(|r| r.identity_id.to_string())
                .unwrap_or_else(|| "-".into()),
            matched_by: o
                .resolution
                .map(|r| r.matched_by.to_string())
                .unwrap_or_else(|| "-".into()),
            detail: o
                .failure
                .as_ref()
                .map(|f| f.to_string())
                .unwrap_or_default(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    println!("{}", separator());

    let done = if report.dry_run { c.cleaned } else { c.confirmed };
    let verb = if report.dry_run { "ready" } else { "confirmed" };
    println!(
        "{prefix}'{source}': {} records | {} {verb} | {} minted | {} matched | {} failed ({} insufficient) | high-water mark {}",
        c.total,
        done.to_string().green().bold(),
        c.minted,
        c.matched,
        if c.failed > 0 {
            c.failed.to_string().red().bold()
        } else {
            c.failed.to_string().normal()
        },
        c.insufficient,
        report.high_water_mark,
    );
}

fn state_label(state: RecordState) -> String {
    let s = state.as_str();
    match state {
        RecordState::Confirmed => s.green().to_string(),
        RecordState::Cleaned => s.cyan().to_string(),
        RecordState::Failed => s.red().to_string(),
        _ => s.yellow().to_string(),
    }
}

// ----- 2. Clinical report -----

#[derive(Tabled)]
struct ClinicalRow {
    #[tabled(rename = "participant")]
    identity_id: String,
    #[tabled(rename = "outcome")]
    action: String,
    #[tabled(rename = "detail")]
    detail: String,
    #[tabled(rename = "write")]
    write: String,
}

pub fn print_clinical_report(report: &ClinicalReport) {
    let prefix = if report.dry_run { "[dry-run] " } else { "" };
    let phase = match report.phase {
        Phase::Extract => "extraction",
        Phase::Upload => "upload",
    };
    if report.outcomes.is_empty() {
        println!("{prefix}✓ {phase}: no participants");
        return;
    }

    let rows: Vec<ClinicalRow> = report
        .outcomes
        .iter()
        .map(|o| {
            let (action, detail) = action_cells(&o.action);
            ClinicalRow {
                identity_id: o.identity_id.clone(),
                action,
                detail,
                write: write_cell(&o.write),
            }
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    println!("{}", separator());

    let c = &report.counts;
    match report.phase {
        Phase::Extract => println!(
            "{prefix}{phase}: {} extracted | {} review needed | {} MRN not found | {} failed | {} skipped | {} write failures",
            c.extracted.to_string().green().bold(),
            c.review_needed.to_string().yellow().bold(),
            c.mrn_not_found,
            c.extraction_failed.to_string().red().bold(),
            c.skipped,
            c.write_failures,
        ),
        Phase::Upload => println!(
            "{prefix}{phase}: {} uploaded | {} failed | {} skipped | {} write failures",
            c.uploaded.to_string().green().bold(),
            c.upload_failed.to_string().red().bold(),
            c.skipped,
            c.write_failures,
        ),
    }
}

fn action_cells(action: &Action) -> (String, String) {
    match action {
        Action::Skipped { reason } => ("skipped".bright_black().to_string(), reason.clone()),
        Action::MrnNotFound => ("mrn not found".yellow().to_string(), String::new()),
        Action::ReviewNeeded { similarity } => (
            "review needed".yellow().to_string(),
            format!("similarity {similarity:.2}"),
        ),
        Action::Extracted {
            person_id,
            labs_needing_review,
            ..
        } => {
            let mut detail = format!("person {person_id}");
            if !labs_needing_review.is_empty() {
                detail.push_str(&format!("; review: {}", labs_needing_review.join(", ")));
            }
            ("extracted".green().to_string(), detail)
        }
        Action::ExtractionFailed { attempts, error } => (
            "extraction failed".red().to_string(),
            format!("after {attempts} attempt(s): {error}"),
        ),
        Action::Uploaded => ("uploaded".green().to_string(), String::new()),
        Action::UploadFailed { reason } => ("upload failed".red().to_string(), reason.clone()),
    }
}

fn write_cell(write: &WriteStatus) -> String {
    match write {
        WriteStatus::NotAttempted => "-".into(),
        WriteStatus::Written { attempts } => format!("ok ({attempts})"),
        WriteStatus::UnexpectedCount { count } => format!("count {count}").red().to_string(),
        WriteStatus::Failed { attempts, .. } => format!("failed ({attempts})").red().to_string(),
    }
}

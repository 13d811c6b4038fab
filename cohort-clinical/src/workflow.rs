//! Extraction and upload runs against the registry and the warehouse.
//!
//! Both phases read the authoritative registry once, decide per participant,
//! and write each participant's outcome back as a single-record upsert.
//! Write-back problems are logged and the run moves on to the next
//! participant. Warehouse queries for one participant are retried as a unit
//! and, once the attempts run out, reported against that participant alone.
//! Only a failed registry export aborts the run.

use chrono::NaiveDate;
use tracing::{debug, error, info, warn};

use cohort_core::normalize::canonical_date;
use cohort_core::FlatRecord;
use cohort_sync::{RecordExport, RecordImport, RetryPolicy};

use crate::error::ClinicalError;
use crate::extraction::{
    check_participation, extraction_eligibility, upload_eligibility, ClinicalVariables,
    Eligibility, Participant,
};
use crate::fields::{self, CdeStatus, Complete, ReviewStatus};
use crate::matcher::FuzzyClinicalMatcher;
use crate::report::{Action, ClinicalReport, ParticipantOutcome, Phase, WriteStatus};
use crate::warehouse::ClinicalWarehouse;

#[derive(Debug, Clone)]
pub struct ClinicalOptions {
    /// Name of the warehouse snapshot being queried.
    pub instance: String,
    pub retry: RetryPolicy,
    pub dry_run: bool,
    /// Stamped into every script log entry.
    pub timestamp: String,
}

fn export_all<R: RecordExport + ?Sized>(
    registry: &R,
    retry: &RetryPolicy,
    wanted: &[String],
) -> Result<Vec<FlatRecord>, ClinicalError> {
    let attempted = retry.run(registry.name(), || registry.export_records(wanted));
    attempted.result.map_err(|error| ClinicalError::Export {
        source_name: registry.name().to_owned(),
        attempts: attempted.attempts,
        error,
    })
}

/// Upsert one record and classify the acknowledgement.
fn write_back<I: RecordImport + ?Sized>(
    store: &I,
    retry: &RetryPolicy,
    label: &str,
    record: &FlatRecord,
) -> WriteStatus {
    let attempted = retry.run(label, || store.import_record(record));
    match attempted.result {
        Ok(ack) if ack.count == 1 => WriteStatus::Written {
            attempts: attempted.attempts,
        },
        Ok(ack) => {
            error!(%label, count = ack.count, "record not updated correctly");
            WriteStatus::UnexpectedCount { count: ack.count }
        }
        Err(e) => {
            error!(%label, attempts = attempted.attempts, error = %e, "write failed");
            WriteStatus::Failed {
                attempts: attempted.attempts,
                error: e.to_string(),
            }
        }
    }
}

/// Append a new entry to a script log, separating it from earlier runs.
fn start_log_entry(previous: &str, header: &str) -> String {
    let mut log = previous.to_owned();
    if !log.is_empty() {
        log.push_str(fields::LOG_SEPARATOR);
    }
    log.push_str(header);
    log
}

fn note(log: &mut String, msg: &str) {
    info!("{msg}");
    log.push_str(msg);
    log.push('\n');
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

pub struct ExtractionWorkflow<'a, R: ?Sized, W: ?Sized> {
    registry: &'a R,
    warehouse: &'a W,
    options: ClinicalOptions,
}

impl<'a, R, W> ExtractionWorkflow<'a, R, W>
where
    R: RecordExport + RecordImport + ?Sized,
    W: ClinicalWarehouse + ?Sized,
{
    pub fn new(registry: &'a R, warehouse: &'a W, options: ClinicalOptions) -> Self {
        Self {
            registry,
            warehouse,
            options,
        }
    }

    pub fn export_fields() -> Vec<String> {
        [
            fields::IDENTITY_ID,
            fields::INTAKE_RECORD_ID,
            fields::DATE_OF_BIRTH,
            fields::MRN,
            fields::FIRST_NAME,
            fields::LAST_NAME,
            fields::SCRIPT_OUTPUT,
            fields::STATUS,
            fields::MRN_QUERIED,
            fields::INSTANCE_QUERIED,
            fields::DOB_QUERIED,
        ]
        .iter()
        .chain(fields::PARTICIPATION_FIELDS.iter())
        .map(|f| f.to_string())
        .collect()
    }

    pub fn run(&self) -> Result<ClinicalReport, ClinicalError> {
        let rows = export_all(self.registry, &self.options.retry, &Self::export_fields())?;
        info!(
            instance = %self.options.instance,
            rows = rows.len(),
            dry_run = self.options.dry_run,
            "starting clinical extraction"
        );

        let mut outcomes = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            let participant = Participant::from_flat(i + 1, row)?;
            let participation = check_participation(row);
            match extraction_eligibility(&participant, &participation, &self.options.instance) {
                Eligibility::Skip(reason) => {
                    debug!(identity_id = %participant.identity_id, %reason, "skipping participant");
                    outcomes.push(ParticipantOutcome {
                        identity_id: participant.identity_id,
                        action: Action::Skipped { reason },
                        write: WriteStatus::NotAttempted,
                    });
                }
                Eligibility::Eligible(why) => {
                    debug!(identity_id = %participant.identity_id, reason = why, "participant eligible");
                    outcomes.push(self.process(&participant));
                }
            }
        }

        info!(participants = outcomes.len(), "finished clinical extraction");
        Ok(ClinicalReport::new(Phase::Extract, self.options.dry_run, outcomes))
    }

    /// Query the warehouse for one eligible participant and write the
    /// outcome back.
    pub fn process(&self, participant: &Participant) -> ParticipantOutcome {
        let attempted = self
            .options
            .retry
            .run(&participant.identity_id, || self.evaluate(participant));
        let (action, record) = match attempted.result {
            Ok(decided) => decided,
            Err(e) => {
                error!(
                    identity_id = %participant.identity_id,
                    attempts = attempted.attempts,
                    error = %e,
                    "extraction failed"
                );
                return ParticipantOutcome {
                    identity_id: participant.identity_id.clone(),
                    action: Action::ExtractionFailed {
                        attempts: attempted.attempts,
                        error: e.to_string(),
                    },
                    write: WriteStatus::NotAttempted,
                };
            }
        };
        let write = if self.options.dry_run || matches!(action, Action::Skipped { .. }) {
            WriteStatus::NotAttempted
        } else {
            write_back(
                self.registry,
                &self.options.retry,
                &participant.identity_id,
                &record,
            )
        };
        ParticipantOutcome {
            identity_id: participant.identity_id.clone(),
            action,
            write,
        }
    }

    /// Decide the outcome for one participant and build the registry record
    /// describing it.
    pub fn evaluate(&self, p: &Participant) -> Result<(Action, FlatRecord), ClinicalError> {
        let instance = &self.options.instance;
        info!(identity_id = %p.identity_id, mrn = %p.mrn, dob = %p.date_of_birth, "starting extraction");

        let mut log = start_log_entry(
            &p.script_output,
            &format!(
                "{}\nmrn:{}\ndob:{}\ndatabase:{}\n",
                self.options.timestamp, p.mrn, p.date_of_birth, instance
            ),
        );
        let mut record = FlatRecord::new();
        record.insert(fields::IDENTITY_ID.into(), p.identity_id.clone());
        record.insert(fields::MRN_QUERIED.into(), p.mrn.clone());
        record.insert(fields::DOB_QUERIED.into(), p.date_of_birth.clone());
        record.insert(fields::INSTANCE_QUERIED.into(), instance.clone());

        let Some(claimed_dob) = parse_date(&p.date_of_birth) else {
            warn!(identity_id = %p.identity_id, dob = %p.date_of_birth, "unparseable date of birth");
            let reason = format!("invalid date of birth '{}'", p.date_of_birth);
            return Ok((Action::Skipped { reason }, FlatRecord::new()));
        };

        let matched = FuzzyClinicalMatcher::new(self.warehouse).find_closest(&p.mrn, claimed_dob)?;
        let Some(person) = matched.person.clone() else {
            note(&mut log, "MRN was not found in the clinical warehouse");
            record.insert(fields::SCRIPT_OUTPUT.into(), log);
            record.insert(fields::STATUS.into(), CdeStatus::MrnNotFound.code().into());
            return Ok((Action::MrnNotFound, record));
        };

        record.insert(
            fields::EHR_DATE_OF_BIRTH.into(),
            person.birth_date.format("%Y-%m-%d").to_string(),
        );
        if !matched.is_exact() {
            let approved = p.status() == Some(CdeStatus::DobMismatchProceed);
            if matched.requires_review(approved) {
                note(
                    &mut log,
                    "DOB found in the warehouse does not match the registry. Review needed.",
                );
                record.insert(fields::SCRIPT_OUTPUT.into(), log);
                record.insert(
                    fields::STATUS.into(),
                    CdeStatus::DobMismatchReviewNeeded.code().into(),
                );
                return Ok((
                    Action::ReviewNeeded {
                        similarity: matched.similarity,
                    },
                    record,
                ));
            }
            note(&mut log, "DOB mismatched, but instructed to proceed");
        }

        // The warehouse holds no names; carry the registry's.
        record.insert(fields::EHR_FIRST_NAME.into(), p.first_name.clone());
        record.insert(fields::EHR_LAST_NAME.into(), p.last_name.clone());

        note(
            &mut log,
            &format!("Extracting for warehouse person_id: {}", person.person_id),
        );
        let vars = ClinicalVariables::extract(self.warehouse, person.person_id)?;
        record.extend(vars.to_fields());
        note(&mut log, "Extraction complete");

        let review = vars.labs_needing_review();
        let review_status = if review.is_empty() {
            log.push_str("No review needed for lab measurements\n");
            ReviewStatus::NotNeeded
        } else {
            note(
                &mut log,
                &format!(
                    "The following labs need review (lab [range]): {}",
                    review.join(", ")
                ),
            );
            ReviewStatus::Needed
        };
        record.insert(fields::REVIEW_STATUS.into(), review_status.code().into());
        // Stays incomplete until the upload phase copies it out.
        record.insert(fields::LOCAL_COMPLETE.into(), Complete::Incomplete.code().into());
        record.insert(fields::STATUS.into(), CdeStatus::Completed.code().into());
        record.insert(fields::SCRIPT_OUTPUT.into(), log);

        Ok((
            Action::Extracted {
                person_id: person.person_id,
                similarity: matched.similarity,
                labs_needing_review: review.into_iter().map(str::to_owned).collect(),
            },
            record,
        ))
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(&canonical_date(raw), "%Y-%m-%d").ok()
}

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

/// Copies completed variables from the registry to the intake store.
pub struct UploadWorkflow<'a, R: ?Sized, I: ?Sized> {
    registry: &'a R,
    intake: &'a I,
    options: ClinicalOptions,
}

impl<'a, R, I> UploadWorkflow<'a, R, I>
where
    R: RecordExport + RecordImport + ?Sized,
    I: RecordImport + ?Sized,
{
    pub fn new(registry: &'a R, intake: &'a I, options: ClinicalOptions) -> Self {
        Self {
            registry,
            intake,
            options,
        }
    }

    pub fn export_fields() -> Vec<String> {
        let mut out: Vec<String> = [
            fields::IDENTITY_ID,
            fields::INTAKE_RECORD_ID,
            fields::STATUS,
            fields::REVIEW_STATUS,
            fields::UPLOAD_SCRIPT_OUTPUT,
            fields::LOCAL_COMPLETE,
        ]
        .iter()
        .map(|f| f.to_string())
        .collect();
        out.extend(fields::data_fields());
        out.extend(fields::PARTICIPATION_FIELDS.iter().map(|f| f.to_string()));
        out
    }

    /// The intake-side record: intake id, unsuffixed data fields and the
    /// completion marker.
    pub fn upload_record(row: &FlatRecord) -> FlatRecord {
        let mut out = FlatRecord::new();
        out.insert(
            fields::INTAKE_RECORD_ID.into(),
            row.get(fields::INTAKE_RECORD_ID).cloned().unwrap_or_default(),
        );
        for local in fields::data_fields() {
            let value = row.get(&local).cloned().unwrap_or_default();
            let name = local
                .strip_suffix(fields::LOCAL_SUFFIX)
                .unwrap_or(&local)
                .to_owned();
            out.insert(name, value);
        }
        out.insert(fields::UPLOAD_COMPLETE.into(), Complete::Complete.code().into());
        out
    }

    pub fn run(&self) -> Result<ClinicalReport, ClinicalError> {
        let rows = export_all(self.registry, &self.options.retry, &Self::export_fields())?;
        info!(rows = rows.len(), dry_run = self.options.dry_run, "starting clinical upload");

        let mut outcomes = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            let identity_id = row
                .get(fields::IDENTITY_ID)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ClinicalError::MissingField {
                    row: i + 1,
                    field: fields::IDENTITY_ID.to_owned(),
                })?;
            let participation = check_participation(row);
            let intake_id = row.get(fields::INTAKE_RECORD_ID).map(|v| v.trim()).unwrap_or("");

            let eligibility = match upload_eligibility(row, &participation) {
                Eligibility::Eligible(_) if intake_id.is_empty() => {
                    Eligibility::Skip("no intake record id".into())
                }
                other => other,
            };
            if let Eligibility::Skip(reason) = eligibility {
                debug!(%identity_id, %reason, "skipping upload");
                outcomes.push(ParticipantOutcome {
                    identity_id,
                    action: Action::Skipped { reason },
                    write: WriteStatus::NotAttempted,
                });
                continue;
            }

            outcomes.push(self.upload_one(identity_id, intake_id, row));
        }

        info!(participants = outcomes.len(), "finished clinical upload");
        Ok(ClinicalReport::new(Phase::Upload, self.options.dry_run, outcomes))
    }

    fn upload_one(&self, identity_id: String, intake_id: &str, row: &FlatRecord) -> ParticipantOutcome {
        info!(%identity_id, %intake_id, "starting upload");
        if self.options.dry_run {
            return ParticipantOutcome {
                identity_id,
                action: Action::Uploaded,
                write: WriteStatus::NotAttempted,
            };
        }

        let previous = row.get(fields::UPLOAD_SCRIPT_OUTPUT).map(String::as_str).unwrap_or("");
        let mut log = start_log_entry(
            previous,
            &format!("{}\nUploading to intake\n", self.options.timestamp),
        );
        let mut local = FlatRecord::new();
        local.insert(fields::IDENTITY_ID.into(), identity_id.clone());

        let upload = Self::upload_record(row);
        let action = match write_back(self.intake, &self.options.retry, intake_id, &upload) {
            WriteStatus::Written { .. } => {
                note(&mut log, "Upload to intake succeeded");
                local.insert(fields::LOCAL_COMPLETE.into(), Complete::Complete.code().into());
                Action::Uploaded
            }
            failed => {
                note(&mut log, "Upload to intake failed");
                Action::UploadFailed {
                    reason: format!("{failed:?}"),
                }
            }
        };
        local.insert(fields::UPLOAD_SCRIPT_OUTPUT.into(), log);

        let write = write_back(self.registry, &self.options.retry, &identity_id, &local);
        ParticipantOutcome {
            identity_id,
            action,
            write,
        }
    }
}

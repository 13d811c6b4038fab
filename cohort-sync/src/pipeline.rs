//! Batch sync: export, resolve, clean, push.
//!
//! One run pulls the full registry and the full intake export once, then
//! walks the candidates in export order. Each candidate moves through
//!
//! ```text
//! PENDING -> RESOLVED -> MINTED | MATCHED -> CLEANED -> PUSHED -> CONFIRMED
//! ```
//!
//! and may drop to `FAILED` from any non-terminal state. A failed record is
//! logged and the batch continues. Export or parse failures abort the run
//! before anything is written.
//!
//! Under [`WritePolicy::NewOnly`] (staff batch uploads) a matched candidate
//! is rejected instead of pushed, so existing registry rows are never
//! touched.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use cohort_core::config::{BatchUploadConfig, CleaningConfig};
use cohort_core::record::candidate_records;
use cohort_core::{
    BatchState, CandidateRecord, Config, FlatRecord, IdentityIndex, IdentityResolver,
    IntakeFieldMap, RegistryFieldMap, ResolveError, ResolverConfig,
};

use crate::clean::RecordCleaner;
use crate::error::SyncError;
use crate::report::{FailureReason, RecordOutcome, SyncReport};
use crate::retry::RetryPolicy;
use crate::transport::{RecordExport, RecordImport};

// ---------------------------------------------------------------------------
// Record state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordState {
    Pending,
    Resolved,
    Minted,
    Matched,
    Cleaned,
    Pushed,
    Confirmed,
    Failed,
}

impl RecordState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }

    pub fn can_transition_to(self, next: RecordState) -> bool {
        use RecordState::*;
        match (self, next) {
            (s, Failed) => !s.is_terminal(),
            (Pending, Resolved) => true,
            (Resolved, Minted | Matched) => true,
            (Minted | Matched, Cleaned) => true,
            (Cleaned, Pushed) => true,
            (Pushed, Confirmed) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Resolved => "RESOLVED",
            Self::Minted => "MINTED",
            Self::Matched => "MATCHED",
            Self::Cleaned => "CLEANED",
            Self::Pushed => "PUSHED",
            Self::Confirmed => "CONFIRMED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for RecordState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Walks one candidate through the state machine.
struct Tracker {
    outcome: RecordOutcome,
}

impl Tracker {
    fn new(row: usize, candidate: &CandidateRecord) -> Self {
        Self {
            outcome: RecordOutcome {
                row,
                source_record_id: candidate.source_record_id.clone(),
                is_repeat_instrument: candidate.is_repeat_instrument,
                state: RecordState::Pending,
                resolution: None,
                failure: None,
                attempts: 0,
            },
        }
    }

    fn advance(&mut self, next: RecordState) {
        debug_assert!(
            self.outcome.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.outcome.state,
            next
        );
        debug!(record = %self.outcome.source_record_id, from = %self.outcome.state, to = %next, "state");
        self.outcome.state = next;
    }

    fn fail(mut self, reason: FailureReason) -> RecordOutcome {
        if reason.is_rejection() {
            warn!(record = %self.outcome.source_record_id, row = self.outcome.row, "skipped: {reason}")
        } else {
            error!(record = %self.outcome.source_record_id, row = self.outcome.row, "failed: {reason}")
        }
        self.advance(RecordState::Failed);
        self.outcome.failure = Some(reason);
        self.outcome
    }

    fn finish(self) -> RecordOutcome {
        self.outcome
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// What happens to candidates that resolve to an existing participant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum WritePolicy {
    /// Push every resolved candidate; matched rows update the registry.
    #[default]
    Upsert,
    /// Push only minted candidates, stamped with the batch flag. Matches,
    /// missing MRNs and MRNs already seen are rejected.
    NewOnly(BatchUploadConfig),
}

/// Admission check on MRNs for [`WritePolicy::NewOnly`] runs.
struct MrnGuard {
    field: String,
    known: HashSet<String>,
    seen: HashSet<String>,
}

impl MrnGuard {
    fn admit(&mut self, candidate: &CandidateRecord) -> Result<(), FailureReason> {
        let mrn = candidate
            .payload
            .get(&self.field)
            .map(|v| v.trim())
            .unwrap_or_default();
        if mrn.is_empty() {
            return Err(FailureReason::MissingMrn);
        }
        if self.known.contains(mrn) {
            return Err(FailureReason::KnownMrn);
        }
        if !self.seen.insert(mrn.to_owned()) {
            return Err(FailureReason::DuplicateMrn);
        }
        Ok(())
    }
}

/// Everything a run needs besides the two stores.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub resolver: ResolverConfig,
    pub retry: RetryPolicy,
    pub intake_fields: IntakeFieldMap,
    pub registry_fields: RegistryFieldMap,
    pub cleaning: CleaningConfig,
    pub policy: WritePolicy,
    /// Stop every record at `CLEANED` and write nothing.
    pub dry_run: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            resolver: ResolverConfig::default(),
            retry: RetryPolicy::default(),
            intake_fields: IntakeFieldMap::default(),
            registry_fields: RegistryFieldMap::default(),
            cleaning: CleaningConfig::default(),
            policy: WritePolicy::Upsert,
            dry_run: false,
        }
    }
}

impl PipelineOptions {
    pub fn from_config(config: &Config, dry_run: bool) -> Self {
        Self {
            resolver: config.identity,
            retry: RetryPolicy::new(config.retry.max_attempts),
            intake_fields: config.fields.remote.clone(),
            registry_fields: config.fields.local.clone(),
            cleaning: config.cleaning.clone(),
            policy: WritePolicy::Upsert,
            dry_run,
        }
    }

    /// Options for a staff CSV batch upload.
    pub fn batch_upload(config: &Config, dry_run: bool) -> Self {
        Self {
            policy: WritePolicy::NewOnly(config.batch.clone()),
            ..Self::from_config(config, dry_run)
        }
    }
}

pub struct SyncPipeline<'a, S: ?Sized, R: ?Sized> {
    source: &'a S,
    registry: &'a R,
    options: PipelineOptions,
}

impl<'a, S, R> SyncPipeline<'a, S, R>
where
    S: RecordExport + ?Sized,
    R: RecordExport + RecordImport + ?Sized,
{
    pub fn new(source: &'a S, registry: &'a R, options: PipelineOptions) -> Self {
        Self {
            source,
            registry,
            options,
        }
    }

    /// Run one batch.
    pub fn run(&self) -> Result<SyncReport, SyncError> {
        let (index, mut mrns) = self.load_registry()?;
        let candidates = self.load_candidates()?;
        info!(
            registry = index.len(),
            candidates = candidates.len(),
            dry_run = self.options.dry_run,
            "starting sync"
        );

        let resolver = IdentityResolver::new(&index, self.options.resolver);
        let mut cleaner = RecordCleaner::new(
            &self.options.cleaning,
            &self.options.intake_fields,
            &self.options.registry_fields,
        );
        if let WritePolicy::NewOnly(batch_upload) = &self.options.policy {
            cleaner = cleaner.with_new_record_flag(&batch_upload.flag_field);
        }
        let mut batch = BatchState::new();

        let outcomes: Vec<RecordOutcome> = candidates
            .iter()
            .enumerate()
            .map(|(row, c)| self.process(row, c, &resolver, &cleaner, &mut batch, mrns.as_mut()))
            .collect();

        let report = SyncReport::new(
            outcomes,
            resolver.high_water_mark(&batch),
            self.options.dry_run,
        );
        info!(
            confirmed = report.counts.confirmed,
            failed = report.counts.failed,
            minted = report.counts.minted,
            high_water_mark = report.high_water_mark,
            "sync finished"
        );
        Ok(report)
    }

    /// Export the registry once and index it. New-only runs also collect
    /// the MRNs already on file.
    fn load_registry(&self) -> Result<(IdentityIndex, Option<MrnGuard>), SyncError> {
        let mut fields = self.options.registry_fields.export_fields();
        if let WritePolicy::NewOnly(batch_upload) = &self.options.policy {
            fields.push(batch_upload.mrn_field.clone());
        }
        let rows = self.export(self.registry, &fields)?;
        let index = IdentityIndex::from_export(&rows, &self.options.registry_fields).map_err(
            |error| SyncError::Record {
                source_name: self.registry.name().to_owned(),
                error,
            },
        )?;

        let guard = match &self.options.policy {
            WritePolicy::Upsert => None,
            WritePolicy::NewOnly(batch_upload) => {
                let known: HashSet<String> = rows
                    .iter()
                    .filter_map(|r| r.get(&batch_upload.mrn_field))
                    .map(|v| v.trim())
                    .filter(|v| !v.is_empty())
                    .map(str::to_owned)
                    .collect();
                debug!(mrns = known.len(), "registry MRNs loaded");
                Some(MrnGuard {
                    field: batch_upload.mrn_field.clone(),
                    known,
                    seen: HashSet::new(),
                })
            }
        };
        Ok((index, guard))
    }

    fn load_candidates(&self) -> Result<Vec<CandidateRecord>, SyncError> {
        // Full rows: the whole payload is written back.
        let rows = self.export(self.source, &[])?;
        candidate_records(rows, &self.options.intake_fields).map_err(|error| SyncError::Record {
            source_name: self.source.name().to_owned(),
            error,
        })
    }

    fn export<E: RecordExport + ?Sized>(
        &self,
        store: &E,
        fields: &[String],
    ) -> Result<Vec<FlatRecord>, SyncError> {
        let attempted = self
            .options
            .retry
            .run(store.name(), || store.export_records(fields));
        attempted.result.map_err(|error| SyncError::Export {
            source_name: store.name().to_owned(),
            attempts: attempted.attempts,
            error,
        })
    }

    fn process(
        &self,
        row: usize,
        candidate: &CandidateRecord,
        resolver: &IdentityResolver<'_>,
        cleaner: &RecordCleaner,
        batch: &mut BatchState,
        mrns: Option<&mut MrnGuard>,
    ) -> RecordOutcome {
        let mut t = Tracker::new(row, candidate);

        if let Some(guard) = mrns {
            if let Err(reason) = guard.admit(candidate) {
                return t.fail(reason);
            }
        }

        let resolution = match resolver.resolve(candidate, batch) {
            Ok(r) => r,
            Err(ResolveError::InsufficientIdentityData { .. }) => {
                return t.fail(FailureReason::InsufficientIdentityData)
            }
            Err(ResolveError::IdentifierRangeExhausted { next, threshold }) => {
                return t.fail(FailureReason::IdentifierRangeExhausted { next, threshold })
            }
        };
        t.advance(RecordState::Resolved);
        t.outcome.resolution = Some(resolution);
        t.advance(if resolution.is_new {
            RecordState::Minted
        } else {
            RecordState::Matched
        });
        debug!(
            record = %candidate.source_record_id,
            identity = %resolution.identity_id,
            matched_by = %resolution.matched_by,
            "resolved"
        );

        if !resolution.is_new && matches!(self.options.policy, WritePolicy::NewOnly(_)) {
            return t.fail(FailureReason::AlreadyRegistered {
                identity_id: resolution.identity_id,
                matched_by: resolution.matched_by,
            });
        }

        let cleaned = cleaner.clean(candidate, &resolution);
        t.advance(RecordState::Cleaned);

        if self.options.dry_run {
            info!(
                record = %candidate.source_record_id,
                identity = %resolution.identity_id,
                "[dry-run] would push"
            );
            return t.finish();
        }

        let attempted = self
            .options
            .retry
            .run(candidate.source_record_id.as_str(), || {
                self.registry.import_record(&cleaned)
            });
        t.outcome.attempts = attempted.attempts;

        let ack = match attempted.result {
            Ok(ack) => ack,
            Err(e) => {
                return t.fail(FailureReason::Transport {
                    attempts: attempted.attempts,
                    error: e.to_string(),
                })
            }
        };
        t.advance(RecordState::Pushed);

        if ack.count != 1 {
            return t.fail(FailureReason::UnexpectedWriteCount { count: ack.count });
        }
        t.advance(RecordState::Confirmed);
        info!(record = %candidate.source_record_id, identity = %resolution.identity_id, "confirmed");
        t.finish()
    }
}

//! End-to-end pipeline runs against in-memory record stores.

use std::cell::{Cell, RefCell};

use cohort_core::{FlatRecord, IdentityId, MatchedBy};
use cohort_sync::{
    FailureReason, ImportAck, PipelineOptions, RecordExport, RecordImport, RecordState,
    RetryPolicy, SyncError, SyncPipeline, TransportError,
};

// ---------------------------------------------------------------------------
// In-memory stores
// ---------------------------------------------------------------------------

fn row(pairs: &[(&str, &str)]) -> FlatRecord {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn unavailable() -> TransportError {
    TransportError::Status {
        endpoint: "mem".into(),
        status: 503,
        body: "try later".into(),
    }
}

struct Intake {
    rows: Vec<FlatRecord>,
}

impl RecordExport for Intake {
    fn name(&self) -> &str {
        "intake"
    }

    fn export_records(&self, _fields: &[String]) -> Result<Vec<FlatRecord>, TransportError> {
        Ok(self.rows.clone())
    }
}

/// Registry that records imports and can fail the first N calls per record.
struct Registry {
    rows: Vec<FlatRecord>,
    imported: RefCell<Vec<FlatRecord>>,
    failures_per_import: u32,
    failing_record: Option<String>,
    ack_count: u64,
    calls: Cell<u32>,
    export_fails: bool,
}

impl Registry {
    fn new(rows: Vec<FlatRecord>) -> Self {
        Self {
            rows,
            imported: RefCell::new(Vec::new()),
            failures_per_import: 0,
            failing_record: None,
            ack_count: 1,
            calls: Cell::new(0),
            export_fails: false,
        }
    }
}

impl RecordExport for Registry {
    fn name(&self) -> &str {
        "registry"
    }

    fn export_records(&self, _fields: &[String]) -> Result<Vec<FlatRecord>, TransportError> {
        if self.export_fails {
            return Err(unavailable());
        }
        Ok(self.rows.clone())
    }
}

impl RecordImport for Registry {
    fn import_record(&self, record: &FlatRecord) -> Result<ImportAck, TransportError> {
        self.calls.set(self.calls.get() + 1);
        let targeted = match &self.failing_record {
            Some(rid) => record.get("first_name") == Some(rid),
            None => true,
        };
        if targeted && self.calls.get() <= self.failures_per_import {
            return Err(unavailable());
        }
        self.imported.borrow_mut().push(record.clone());
        Ok(ImportAck {
            count: self.ack_count,
        })
    }
}

fn registry_rows() -> Vec<FlatRecord> {
    vec![row(&[
        ("cuimc_id", "7"),
        ("record_id", "A1"),
        ("participant_lab_id", ""),
        ("first_local", "jane"),
        ("last_local", "doe"),
        ("dob", "1990-01-01"),
    ])]
}

fn intake_row(rid: &str, first: &str, last: &str, dob: &str) -> FlatRecord {
    row(&[
        ("record_id", rid),
        ("participant_lab_id", ""),
        ("first_name", first),
        ("last_name", last),
        ("date_of_birth", dob),
        ("redcap_repeat_instance", ""),
        ("survey_queue_link", "https://survey.example/q"),
    ])
}

fn scenario_intake() -> Intake {
    Intake {
        rows: vec![
            intake_row("R9", "Jane", "Doe", "1990-01-01"),
            intake_row("R10", "John", "Smith", "2001-05-05"),
            intake_row("R11", "", "", ""),
        ],
    }
}

// ---------------------------------------------------------------------------
// 1. Happy path
// ---------------------------------------------------------------------------

#[test]
fn scenario_confirms_matches_and_mints() {
    let intake = scenario_intake();
    let registry = Registry::new(registry_rows());
    let report = SyncPipeline::new(&intake, &registry, PipelineOptions::default())
        .run()
        .expect("run");

    assert_eq!(report.counts.total, 3);
    assert_eq!(report.counts.confirmed, 2);
    assert_eq!(report.counts.insufficient, 1);
    assert_eq!(report.counts.minted, 1);
    assert_eq!(report.counts.matched, 1);
    assert_eq!(report.high_water_mark, 8);

    let jane = &report.outcomes[0];
    assert_eq!(jane.state, RecordState::Confirmed);
    let r = jane.resolution.expect("resolved");
    assert_eq!(r.identity_id, IdentityId(7));
    assert_eq!(r.matched_by, MatchedBy::NameDobAdult);

    let skipped = &report.outcomes[2];
    assert_eq!(skipped.state, RecordState::Failed);
    assert_eq!(skipped.failure, Some(FailureReason::InsufficientIdentityData));
    assert_eq!(skipped.attempts, 0);

    let imported = registry.imported.borrow();
    assert_eq!(imported.len(), 2, "the skipped record is never written");
    assert_eq!(imported[0].get("cuimc_id").map(String::as_str), Some("7"));
    assert!(!imported[0].contains_key("r4_yn"));
    assert_eq!(imported[1].get("cuimc_id").map(String::as_str), Some("8"));
    assert_eq!(imported[1].get("r4_yn").map(String::as_str), Some("1"));
    assert!(imported.iter().all(|r| !r.contains_key("survey_queue_link")));
}

#[test]
fn repeat_instrument_follows_parent() {
    let mut repeat = intake_row("R10", "", "", "");
    repeat.insert("redcap_repeat_instance".into(), "1".into());
    repeat.insert("redcap_repeat_instrument".into(), "visit".into());
    let intake = Intake {
        rows: vec![intake_row("R10", "John", "Smith", "2001-05-05"), repeat],
    };
    let registry = Registry::new(registry_rows());
    let report = SyncPipeline::new(&intake, &registry, PipelineOptions::default())
        .run()
        .expect("run");

    assert_eq!(report.counts.confirmed, 2);
    assert_eq!(report.counts.minted, 1);
    let imported = registry.imported.borrow();
    assert_eq!(imported[1].get("cuimc_id").map(String::as_str), Some("8"));
    assert!(!imported[1].contains_key("record_id"));
    assert!(!imported[1].contains_key("r4_yn"));
}

// ---------------------------------------------------------------------------
// 2. Dry run
// ---------------------------------------------------------------------------

#[test]
fn dry_run_stops_at_cleaned_and_writes_nothing() {
    let intake = scenario_intake();
    let registry = Registry::new(registry_rows());
    let options = PipelineOptions {
        dry_run: true,
        ..Default::default()
    };
    let report = SyncPipeline::new(&intake, &registry, options).run().expect("run");

    assert!(report.dry_run);
    assert_eq!(report.counts.cleaned, 2);
    assert_eq!(report.counts.confirmed, 0);
    assert_eq!(registry.calls.get(), 0);
    assert_eq!(report.high_water_mark, 8);
}

// ---------------------------------------------------------------------------
// 3. Failures
// ---------------------------------------------------------------------------

#[test]
fn transient_import_failures_are_retried() {
    let intake = Intake {
        rows: vec![intake_row("R9", "Jane", "Doe", "1990-01-01")],
    };
    let mut registry = Registry::new(registry_rows());
    registry.failures_per_import = 3;
    let report = SyncPipeline::new(&intake, &registry, PipelineOptions::default())
        .run()
        .expect("run");
    assert_eq!(report.outcomes[0].state, RecordState::Confirmed);
    assert_eq!(report.outcomes[0].attempts, 4);
}

#[test]
fn exhausted_retries_fail_record_and_batch_continues() {
    let intake = scenario_intake();
    let mut registry = Registry::new(registry_rows());
    registry.failures_per_import = 2;
    registry.failing_record = Some("Jane".into());
    let options = PipelineOptions {
        retry: RetryPolicy::new(2),
        ..Default::default()
    };
    let report = SyncPipeline::new(&intake, &registry, options).run().expect("run");

    let jane = &report.outcomes[0];
    assert_eq!(jane.state, RecordState::Failed);
    assert!(matches!(jane.failure, Some(FailureReason::Transport { attempts: 2, .. })));
    assert_eq!(report.outcomes[1].state, RecordState::Confirmed);
}

#[test]
fn unexpected_write_count_fails_record() {
    let intake = Intake {
        rows: vec![intake_row("R9", "Jane", "Doe", "1990-01-01")],
    };
    let mut registry = Registry::new(registry_rows());
    registry.ack_count = 0;
    let report = SyncPipeline::new(&intake, &registry, PipelineOptions::default())
        .run()
        .expect("run");
    assert_eq!(
        report.outcomes[0].failure,
        Some(FailureReason::UnexpectedWriteCount { count: 0 })
    );
    assert_eq!(report.outcomes[0].attempts, 1);
}

#[test]
fn registry_export_failure_aborts_before_writes() {
    let intake = scenario_intake();
    let mut registry = Registry::new(registry_rows());
    registry.export_fails = true;
    let err = SyncPipeline::new(&intake, &registry, PipelineOptions::default())
        .run()
        .unwrap_err();
    assert!(matches!(err, SyncError::Export { attempts: 5, .. }), "got: {err}");
    assert_eq!(registry.calls.get(), 0);
}

#[test]
fn malformed_intake_row_aborts_run() {
    let mut bad = intake_row("R9", "Jane", "Doe", "1990-01-01");
    bad.remove("last_name");
    let intake = Intake { rows: vec![bad] };
    let registry = Registry::new(registry_rows());
    let err = SyncPipeline::new(&intake, &registry, PipelineOptions::default())
        .run()
        .unwrap_err();
    assert!(matches!(err, SyncError::Record { .. }), "got: {err}");
    assert!(err.to_string().contains("last_name"));
    assert_eq!(registry.calls.get(), 0);
}

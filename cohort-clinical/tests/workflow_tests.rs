//! Extraction and upload runs against a JSON warehouse snapshot and an
//! in-memory registry.

use std::cell::{Cell, RefCell};

use cohort_clinical::warehouse::{
    ConditionEvent, ConditionKind, LabKind, Measurement, WarehousePerson,
};
use cohort_clinical::{
    Action, ClinicalError, ClinicalOptions, ClinicalWarehouse, ExtractionWorkflow, FacilityCode,
    JsonWarehouse, UploadWorkflow, WriteStatus,
};
use cohort_core::FlatRecord;
use cohort_sync::{ImportAck, RecordExport, RecordImport, RetryPolicy, TransportError};
use tempfile::TempDir;

const SNAPSHOT: &str = r#"{
  "persons": [
    {
      "person_id": 11,
      "mrn": "1234567",
      "facility_code": "P",
      "birth_date": "2015-03-01",
      "measurements": [
        {"lab": "sbp", "concept_id": 3004249, "concept_name": "Systolic blood pressure", "date": "2023-02-01", "value": 110},
        {"lab": "dbp", "concept_id": 3012888, "concept_name": "Diastolic blood pressure", "date": "2023-02-01", "value": 70}
      ],
      "positive_allergy_tests": [3007757, 3037831],
      "conditions": [
        {"kind": "wheeze", "date": "2015-06-01"},
        {"kind": "wheeze", "date": "2016-01-01"}
      ]
    },
    {
      "person_id": 12,
      "mrn": "7654321",
      "facility_code": "P",
      "birth_date": "2012-05-05"
    }
  ]
}"#;

fn row(pairs: &[(&str, &str)]) -> FlatRecord {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn participant(id: &str, mrn: &str, dob: &str) -> FlatRecord {
    row(&[
        ("cuimc_id", id),
        ("record_id", ""),
        ("mrn", mrn),
        ("participant_date_of_birth", dob),
        ("participant_first_name", "Ana"),
        ("last_name", "Li"),
        ("age", "9"),
        ("date_consent_cu_2_pp", "2024-01-10"),
        ("date_consent_cu_2", ""),
        ("participant_withdrawal", "0"),
        ("gira_cde_status", ""),
        ("gira_cde_script_output", ""),
        ("gira_cde_mrn_queried", ""),
        ("gira_cde_dob_queried", ""),
        ("gira_cde_omop_instance", ""),
    ])
}

struct Store {
    name: &'static str,
    rows: Vec<FlatRecord>,
    imported: RefCell<Vec<FlatRecord>>,
    ack_count: u64,
}

impl Store {
    fn new(name: &'static str, rows: Vec<FlatRecord>) -> Self {
        Self {
            name,
            rows,
            imported: RefCell::new(Vec::new()),
            ack_count: 1,
        }
    }

    fn written(&self, id: &str) -> FlatRecord {
        self.imported
            .borrow()
            .iter()
            .find(|r| r.get("cuimc_id").map(String::as_str) == Some(id))
            .cloned()
            .unwrap_or_else(|| panic!("no write for {id}"))
    }
}

impl RecordExport for Store {
    fn name(&self) -> &str {
        self.name
    }

    fn export_records(&self, _fields: &[String]) -> Result<Vec<FlatRecord>, TransportError> {
        Ok(self.rows.clone())
    }
}

impl RecordImport for Store {
    fn import_record(&self, record: &FlatRecord) -> Result<ImportAck, TransportError> {
        self.imported.borrow_mut().push(record.clone());
        Ok(ImportAck {
            count: self.ack_count,
        })
    }
}

fn options(dry_run: bool) -> ClinicalOptions {
    ClinicalOptions {
        instance: "omop_2024q3".into(),
        retry: RetryPolicy::new(2),
        dry_run,
        timestamp: "2024-10-01T09:00:00".into(),
    }
}

fn warehouse() -> (TempDir, JsonWarehouse) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("warehouse.json");
    std::fs::write(&path, SNAPSHOT).expect("write snapshot");
    let wh = JsonWarehouse::open(&path).expect("open snapshot");
    (dir, wh)
}

// ----- 1. Extraction -----

#[test]
fn extraction_covers_every_gate() {
    let (_dir, wh) = warehouse();
    let mut withdrawn = participant("4", "1234567", "2015-03-01");
    withdrawn.insert("participant_withdrawal".into(), "1".into());
    let mut completed = participant("5", "1234567", "2015-03-01");
    completed.insert("gira_cde_status".into(), "1".into());

    let registry = Store::new(
        "registry",
        vec![
            participant("1", "1234567", "2015-03-01"),
            participant("2", "7654321", "2012-05-06"),
            participant("3", "1111111", "2001-01-01"),
            withdrawn,
            completed,
        ],
    );
    let report = ExtractionWorkflow::new(&registry, &wh, options(false))
        .run()
        .expect("run");

    assert_eq!(report.counts.extracted, 1);
    assert_eq!(report.counts.review_needed, 1);
    assert_eq!(report.counts.mrn_not_found, 1);
    assert_eq!(report.counts.skipped, 2);
    assert_eq!(registry.imported.borrow().len(), 3);

    let done = registry.written("1");
    assert_eq!(done["gira_cde_status"], "1");
    assert_eq!(done["gira_cde_review_status"], "1");
    assert_eq!(done["gira_clinical_variables_local_complete"], "0");
    assert_eq!(done["gira_cde_omop_instance"], "omop_2024q3");
    assert_eq!(done["sbp_value_most_recent_local"], "110");
    assert_eq!(done["hdl_value_most_recent_local"], "-9");
    assert_eq!(done["allergy_test_flag_local"], "1");
    assert_eq!(done["wheezing_flag_local"], "1");
    assert_eq!(done["eczema_flag_local"], "0");
    assert_eq!(done["ehr_participant_first_name_local"], "Ana");
    assert_eq!(done["ehr_date_of_birth_local"], "2015-03-01");
    let log = &done["gira_cde_script_output"];
    assert!(log.starts_with("2024-10-01T09:00:00\nmrn:1234567\ndob:2015-03-01\ndatabase:omop_2024q3\n"));
    assert!(log.contains("Extracting for warehouse person_id: 11"));

    let review = registry.written("2");
    assert_eq!(review["gira_cde_status"], "2");
    assert_eq!(review["ehr_date_of_birth_local"], "2012-05-05");
    assert!(!review.contains_key("sbp_value_most_recent_local"));

    let missing = registry.written("3");
    assert_eq!(missing["gira_cde_status"], "5");
    assert!(missing["gira_cde_script_output"].contains("MRN was not found"));
}

#[test]
fn approved_mismatch_proceeds_and_log_is_appended() {
    let (_dir, wh) = warehouse();
    let mut p = participant("2", "7654321", "2012-05-06");
    p.insert("gira_cde_status".into(), "4".into());
    p.insert("gira_cde_dob_queried".into(), "2012-05-06".into());
    p.insert("gira_cde_omop_instance".into(), "omop_2024q3".into());
    p.insert("gira_cde_script_output".into(), "earlier run\n".into());
    let registry = Store::new("registry", vec![p]);

    let report = ExtractionWorkflow::new(&registry, &wh, options(false))
        .run()
        .expect("run");

    assert!(matches!(report.outcomes[0].action, Action::Extracted { person_id: 12, .. }));
    let written = registry.written("2");
    let log = &written["gira_cde_script_output"];
    assert!(log.starts_with("earlier run\n===============================\n2024-10-01T09:00:00\n"));
    assert!(log.contains("instructed to proceed"));
    // DBP with no SBP is never flagged; both are missing here.
    assert_eq!(written["gira_cde_review_status"], "1");
}

#[test]
fn dry_run_writes_nothing() {
    let (_dir, wh) = warehouse();
    let registry = Store::new("registry", vec![participant("1", "1234567", "2015-03-01")]);
    let report = ExtractionWorkflow::new(&registry, &wh, options(true))
        .run()
        .expect("run");
    assert_eq!(report.counts.extracted, 1);
    assert_eq!(report.outcomes[0].write, WriteStatus::NotAttempted);
    assert!(registry.imported.borrow().is_empty());
}

#[test]
fn unexpected_write_count_is_reported_and_run_continues() {
    let (_dir, wh) = warehouse();
    let mut registry = Store::new(
        "registry",
        vec![
            participant("1", "1234567", "2015-03-01"),
            participant("3", "1111111", "2001-01-01"),
        ],
    );
    registry.ack_count = 0;
    let report = ExtractionWorkflow::new(&registry, &wh, options(false))
        .run()
        .expect("run");
    assert_eq!(report.counts.write_failures, 2);
    assert!(report.has_failures());
    assert_eq!(registry.imported.borrow().len(), 2);
}

#[test]
fn row_without_identity_aborts() {
    let (_dir, wh) = warehouse();
    let registry = Store::new("registry", vec![participant("", "1234567", "2015-03-01")]);
    let err = ExtractionWorkflow::new(&registry, &wh, options(false))
        .run()
        .unwrap_err();
    assert!(matches!(err, ClinicalError::MissingField { row: 1, .. }), "got: {err}");
}

/// Snapshot whose MRN lookups fail for one MRN, for the first `failures`
/// calls or always.
struct FlakyWarehouse {
    inner: JsonWarehouse,
    bad_mrn: &'static str,
    failures: Option<u32>,
    calls: Cell<u32>,
}

impl ClinicalWarehouse for FlakyWarehouse {
    fn persons_by_mrn(
        &self,
        mrn: &str,
        facility: FacilityCode,
    ) -> Result<Vec<WarehousePerson>, ClinicalError> {
        if mrn == self.bad_mrn {
            self.calls.set(self.calls.get() + 1);
            if self.failures.map_or(true, |n| self.calls.get() <= n) {
                return Err(ClinicalError::Warehouse("connection reset".into()));
            }
        }
        self.inner.persons_by_mrn(mrn, facility)
    }

    fn latest_measurement(
        &self,
        person_id: u64,
        lab: LabKind,
    ) -> Result<Option<Measurement>, ClinicalError> {
        self.inner.latest_measurement(person_id, lab)
    }

    fn positive_allergy_tests(&self, person_id: u64) -> Result<u32, ClinicalError> {
        self.inner.positive_allergy_tests(person_id)
    }

    fn condition_events(
        &self,
        person_id: u64,
        kind: ConditionKind,
    ) -> Result<Vec<ConditionEvent>, ClinicalError> {
        self.inner.condition_events(person_id, kind)
    }
}

#[test]
fn warehouse_failure_is_isolated_to_one_participant() {
    let (_dir, inner) = warehouse();
    let wh = FlakyWarehouse {
        inner,
        bad_mrn: "7654321",
        failures: None,
        calls: Cell::new(0),
    };
    let registry = Store::new(
        "registry",
        vec![
            participant("2", "7654321", "2012-05-05"),
            participant("1", "1234567", "2015-03-01"),
        ],
    );
    let report = ExtractionWorkflow::new(&registry, &wh, options(false))
        .run()
        .expect("run continues past a failing participant");

    assert_eq!(wh.calls.get(), 2, "retried up to the policy bound");
    assert!(matches!(
        &report.outcomes[0].action,
        Action::ExtractionFailed { attempts: 2, error } if error.contains("connection reset")
    ));
    assert_eq!(report.outcomes[0].write, WriteStatus::NotAttempted);
    assert!(matches!(report.outcomes[1].action, Action::Extracted { person_id: 11, .. }));
    assert_eq!(report.counts.extraction_failed, 1);
    assert!(report.has_failures());

    let written = registry.imported.borrow();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0]["cuimc_id"], "1");
}

#[test]
fn transient_warehouse_failure_is_retried() {
    let (_dir, inner) = warehouse();
    let wh = FlakyWarehouse {
        inner,
        bad_mrn: "7654321",
        failures: Some(1),
        calls: Cell::new(0),
    };
    let registry = Store::new("registry", vec![participant("2", "7654321", "2012-05-05")]);
    let report = ExtractionWorkflow::new(&registry, &wh, options(false))
        .run()
        .expect("run");
    assert!(matches!(report.outcomes[0].action, Action::Extracted { person_id: 12, .. }));
    assert_eq!(report.counts.extraction_failed, 0);
}

// ----- 2. Upload -----

fn extracted(id: &str, intake_id: &str, review: &str) -> FlatRecord {
    let mut r = row(&[
        ("cuimc_id", id),
        ("record_id", intake_id),
        ("age", "30"),
        ("date_consent_cu_2", "2024-01-10"),
        ("participant_withdrawal", "0"),
        ("gira_cde_status", "1"),
        ("gira_cde_review_status", review),
        ("gira_clinical_variables_local_complete", "0"),
        ("gira_cde_r4_script_output", ""),
    ]);
    r.insert("sbp_value_most_recent_local".into(), "110".into());
    r.insert("ehr_participant_first_name_local".into(), "Ana".into());
    r
}

#[test]
fn upload_copies_variables_and_marks_complete() {
    let registry = Store::new(
        "registry",
        vec![
            extracted("1", "R-9", "1"),
            extracted("2", "R-10", "2"),
            extracted("3", "R-11", "3"),
        ],
    );
    let intake = Store::new("intake", Vec::new());
    let report = UploadWorkflow::new(&registry, &intake, options(false))
        .run()
        .expect("run");

    assert_eq!(report.counts.uploaded, 2);
    assert_eq!(report.counts.skipped, 1);

    let uploads = intake.imported.borrow();
    assert_eq!(uploads.len(), 2);
    let first = &uploads[0];
    assert_eq!(first["record_id"], "R-9");
    assert_eq!(first["sbp_value_most_recent"], "110");
    assert_eq!(first["ehr_participant_first_name"], "Ana");
    assert_eq!(first["gira_clinical_variables_complete"], "2");
    assert!(first.keys().all(|k| !k.ends_with("_local")));

    let local = registry.written("1");
    assert_eq!(local["gira_clinical_variables_local_complete"], "2");
    assert!(local["gira_cde_r4_script_output"].contains("Upload to intake succeeded"));
}

#[test]
fn failed_upload_keeps_instrument_open() {
    let registry = Store::new("registry", vec![extracted("1", "R-9", "1")]);
    let mut intake = Store::new("intake", Vec::new());
    intake.ack_count = 0;
    let report = UploadWorkflow::new(&registry, &intake, options(false))
        .run()
        .expect("run");

    assert_eq!(report.counts.upload_failed, 1);
    let local = registry.written("1");
    assert!(!local.contains_key("gira_clinical_variables_local_complete"));
    assert!(local["gira_cde_r4_script_output"].contains("Upload to intake failed"));
}

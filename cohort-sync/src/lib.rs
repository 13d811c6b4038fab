//! # cohort-sync
//!
//! Batch synchronization from an intake system into the authoritative
//! registry.
//!
//! Build a [`SyncPipeline`] over any [`RecordExport`] source and a registry
//! implementing both [`RecordExport`] and [`RecordImport`], then call
//! [`SyncPipeline::run`].

pub mod clean;
pub mod csv_intake;
pub mod error;
pub mod pipeline;
pub mod report;
pub mod retry;
pub mod transport;

pub use clean::RecordCleaner;
pub use csv_intake::CsvIntake;
pub use error::{SyncError, TransportError};
pub use pipeline::{PipelineOptions, RecordState, SyncPipeline, WritePolicy};
pub use report::{FailureReason, RecordOutcome, SyncCounts, SyncReport};
pub use retry::{Attempted, RetryPolicy};
pub use transport::{ImportAck, RecordExport, RecordImport};

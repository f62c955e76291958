//! pepsub-engine library interface
//!
//! Batch submission and fault isolation for sequence prediction backends:
//! records are planned into batches, each batch is submitted to a [`Backend`],
//! failing batches are bisected down to single records, and returned rows are
//! reconciled to exactly one [`Outcome`] per input record.

pub mod backend;
#[cfg(any(test, feature = "test-util"))]
pub mod doubles;
pub mod error;
pub mod io;
pub mod job_window;
pub mod orchestrator;
pub mod pacer;
pub mod planner;
pub mod polling;
pub mod probe;
pub mod progress;
pub mod reconciler;
pub mod resubmit;
pub mod submitter;
pub mod types;

pub use crate::backend::{Backend, BackendCapabilities, CorrelationMode, TieBreak};
pub use crate::error::{EngineError, EngineResult};
pub use crate::orchestrator::{JobCompletion, JobOrchestrator, JobReport};
pub use crate::pacer::Pacer;
pub use crate::planner::{plan, Batch, BatchPlan};
pub use crate::reconciler::{ReconciledBatch, ResultReconciler};
pub use crate::submitter::FaultIsolatingSubmitter;
pub use crate::types::{
    BackendFailure, Label, Outcome, RawRow, Record, RowKey, SubmissionResult, UnresolvedCause,
};

//! Job-level orchestration
//!
//! Drives one submission job: validates the setup, walks the batch plan in
//! order, hands each batch to the [`FaultIsolatingSubmitter`], and concatenates
//! the reconciled batches into one outcome per input record. Progress is
//! reported to an injected [`ProgressObserver`] once per completed batch.
//!
//! # Cancellation
//! A cancelled job is not an error. The report carries the outcomes of every
//! batch completed before cancellation plus the ids that were never processed;
//! a batch interrupted mid-bisection is discarded whole.

use crate::backend::Backend;
use crate::error::{EngineError, EngineResult};
use crate::pacer::Pacer;
use crate::planner::plan;
use crate::progress::{BatchProgress, JobStart, JobSummary, NoopObserver, ProgressObserver};
use crate::submitter::FaultIsolatingSubmitter;
use crate::types::{Outcome, Record};
use chrono::{DateTime, Utc};
use pepsub_common::config::TomlConfig;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// How a job ended
#[derive(Debug, Clone, PartialEq)]
pub enum JobCompletion {
    /// Every record has an outcome
    Complete,
    /// Stopped early; these ids (in input order) were never processed
    Cancelled { unprocessed: Vec<String> },
}

/// Result of one submission job
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job_id: Uuid,
    pub backend_id: String,
    /// One per processed record, in input order
    pub outcomes: Vec<Outcome>,
    pub completion: JobCompletion,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub batches_completed: usize,
    pub total_batches: usize,
}

impl JobReport {
    pub fn is_complete(&self) -> bool {
        self.completion == JobCompletion::Complete
    }

    pub fn unresolved_ids(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| !o.is_resolved())
            .map(|o| o.id.as_str())
            .collect()
    }

    pub fn unresolved_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_resolved()).count()
    }

    /// Ids never submitted because the job was cancelled
    pub fn unprocessed_ids(&self) -> &[String] {
        match &self.completion {
            JobCompletion::Complete => &[],
            JobCompletion::Cancelled { unprocessed } => unprocessed,
        }
    }
}

/// Runs submission jobs against a backend
pub struct JobOrchestrator {
    submitter: FaultIsolatingSubmitter,
    observer: Arc<dyn ProgressObserver>,
    /// Source of per-backend batch sizes for [`JobOrchestrator::run_configured`]
    config: TomlConfig,
}

impl JobOrchestrator {
    pub fn new(pacer: Arc<Pacer>) -> Self {
        Self::with_submitter(FaultIsolatingSubmitter::new(pacer))
    }

    pub fn with_submitter(submitter: FaultIsolatingSubmitter) -> Self {
        Self {
            submitter,
            observer: Arc::new(NoopObserver),
            config: TomlConfig::default(),
        }
    }

    /// Build pacer, submitter and batch sizes from `[engine]` and `[backends.*]`
    ///
    /// # Errors
    /// `Common` when the configuration fails validation.
    pub fn from_config(config: &TomlConfig) -> EngineResult<Self> {
        config.validate()?;
        let pacer = Arc::new(Pacer::from_config(config));
        let mut orchestrator =
            Self::with_submitter(FaultIsolatingSubmitter::from_settings(pacer, &config.engine));
        orchestrator.config = config.clone();
        Ok(orchestrator)
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn submitter(&self) -> &FaultIsolatingSubmitter {
        &self.submitter
    }

    /// Batch size used by [`JobOrchestrator::run_configured`] for `backend_id`
    pub fn batch_size_for(&self, backend_id: &str) -> usize {
        self.config.batch_size_for(backend_id)
    }

    /// Run with the configured batch size for `backend`
    ///
    /// Uses `[backends.<id>].batch_size` when set, else `engine.batch_size`.
    pub async fn run_configured<B>(
        &self,
        records: &[Record],
        backend: &B,
        cancel: &CancellationToken,
    ) -> EngineResult<JobReport>
    where
        B: Backend + ?Sized,
    {
        let batch_size = self.batch_size_for(backend.id());
        self.run(records, backend, batch_size, cancel).await
    }

    /// Run `records` through `backend` in batches of `batch_size`
    ///
    /// # Errors
    /// `InvalidConfiguration` for a batch size outside `1..=max_batch_size` or
    /// duplicate record ids. Backend failures never fail the job.
    pub async fn run<B>(
        &self,
        records: &[Record],
        backend: &B,
        batch_size: usize,
        cancel: &CancellationToken,
    ) -> EngineResult<JobReport>
    where
        B: Backend + ?Sized,
    {
        let capabilities = backend.capabilities();
        if batch_size > capabilities.max_batch_size {
            return Err(EngineError::InvalidConfiguration(format!(
                "batch size {} exceeds {} limit of {}",
                batch_size,
                backend.id(),
                capabilities.max_batch_size
            )));
        }
        let batches = plan(records, batch_size)?;
        ensure_unique_ids(records)?;

        let job_id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();
        let total_batches = batches.batch_count();

        self.observer.job_started(&JobStart {
            job_id,
            backend_id: backend.id().to_string(),
            total_records: records.len(),
            total_batches,
        });

        let mut outcomes = Vec::with_capacity(records.len());
        let mut batches_completed = 0;
        let mut unprocessed_from = None;

        for (batch_index, batch) in batches.enumerate() {
            if cancel.is_cancelled() {
                unprocessed_from = Some(batch.start());
                break;
            }

            let batch_started = Instant::now();
            let reconciled = match self.submitter.submit(batch, backend, cancel).await {
                Ok(reconciled) => reconciled,
                Err(EngineError::Cancelled) => {
                    tracing::info!(
                        job_id = %job_id,
                        batch_index,
                        "Job cancelled mid-batch, discarding partial batch"
                    );
                    unprocessed_from = Some(batch.start());
                    break;
                }
                Err(e) => return Err(e),
            };

            let unresolved = reconciled.unresolved_count();
            outcomes.extend(reconciled.into_outcomes());
            batches_completed += 1;

            self.observer.batch_completed(&BatchProgress {
                job_id,
                batch_index,
                batch_size: batch.len(),
                elapsed: batch_started.elapsed(),
                unresolved,
                records_completed: outcomes.len(),
                total_records: records.len(),
            });
        }

        let completion = match unprocessed_from {
            None => JobCompletion::Complete,
            Some(offset) => JobCompletion::Cancelled {
                unprocessed: records[offset..].iter().map(|r| r.id.clone()).collect(),
            },
        };

        let report = JobReport {
            job_id,
            backend_id: backend.id().to_string(),
            outcomes,
            completion,
            started_at,
            elapsed: started.elapsed(),
            batches_completed,
            total_batches,
        };

        self.observer.job_finished(&JobSummary {
            job_id,
            resolved: report.outcomes.len() - report.unresolved_count(),
            unresolved: report.unresolved_count(),
            unprocessed: report.unprocessed_ids().len(),
            cancelled: !report.is_complete(),
            elapsed: report.elapsed,
        });

        Ok(report)
    }
}

fn ensure_unique_ids(records: &[Record]) -> EngineResult<()> {
    let mut seen = HashSet::with_capacity(records.len());
    for record in records {
        if !seen.insert(record.id.as_str()) {
            return Err(EngineError::InvalidConfiguration(format!(
                "duplicate record id '{}'",
                record.id
            )));
        }
    }
    Ok(())
}

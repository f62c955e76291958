//! Fault-isolating batch submission
//!
//! Turns one batch into a complete [`ReconciledBatch`] despite partial or total
//! backend failure. A batch that fails, or comes back with no usable rows, is
//! split in half and each half is resubmitted; recursion stops at a single
//! record, which is then reported as unresolved. One bad record therefore costs
//! `O(log n)` extra calls instead of voiding its whole batch.

use crate::backend::Backend;
use crate::error::{EngineError, EngineResult};
use crate::pacer::Pacer;
use crate::planner::Batch;
use crate::reconciler::{ReconciledBatch, ResultReconciler};
use crate::types::{BackendFailure, Outcome, SubmissionResult, UnresolvedCause};
use futures::future::{BoxFuture, FutureExt};
use pepsub_common::config::EngineSettings;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Submits batches with recursive bisection on failure
pub struct FaultIsolatingSubmitter {
    pacer: Arc<Pacer>,
    call_timeout: Option<Duration>,
    /// Bounds concurrent calls when bisection halves run in parallel
    call_slots: Arc<Semaphore>,
}

impl FaultIsolatingSubmitter {
    pub fn new(pacer: Arc<Pacer>) -> Self {
        Self {
            pacer,
            call_timeout: None,
            call_slots: Arc::new(Semaphore::new(
                EngineSettings::default().max_concurrent_calls,
            )),
        }
    }

    pub fn from_settings(pacer: Arc<Pacer>, settings: &EngineSettings) -> Self {
        Self::new(pacer)
            .with_call_timeout(settings.call_timeout())
            .with_max_concurrent_calls(settings.max_concurrent_calls)
    }

    /// Treat backend calls running longer than `timeout` as failed
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_max_concurrent_calls(mut self, max: usize) -> Self {
        self.call_slots = Arc::new(Semaphore::new(max.max(1)));
        self
    }

    pub fn pacer(&self) -> &Arc<Pacer> {
        &self.pacer
    }

    /// Submit one batch, bisecting on failure until every record is accounted for
    ///
    /// The returned batch holds one outcome per input record, in input order.
    /// Only `EmptyBatch` and `Cancelled` are returned as errors.
    pub async fn submit<B>(
        &self,
        batch: Batch<'_>,
        backend: &B,
        cancel: &CancellationToken,
    ) -> EngineResult<ReconciledBatch>
    where
        B: Backend + ?Sized,
    {
        let capabilities = backend.capabilities();
        let reconciler = ResultReconciler::for_backend(&capabilities);
        self.isolate(
            batch,
            backend,
            reconciler,
            capabilities.concurrency_safe,
            cancel,
            0,
        )
        .await
    }

    fn isolate<'a, B>(
        &'a self,
        batch: Batch<'a>,
        backend: &'a B,
        reconciler: ResultReconciler,
        concurrent: bool,
        cancel: &'a CancellationToken,
        depth: u32,
    ) -> BoxFuture<'a, EngineResult<ReconciledBatch>>
    where
        B: Backend + ?Sized,
    {
        async move {
            if batch.is_empty() {
                return Err(EngineError::EmptyBatch(format!(
                    "zero-size batch at offset {} (depth {})",
                    batch.start(),
                    depth
                )));
            }

            let failure = match self.attempt(&batch, backend, cancel).await? {
                SubmissionResult::Rows(rows) => {
                    let result = reconciler.reconcile_with_stats(&batch, &rows);
                    if result.matched > 0 {
                        debug!(
                            backend = %backend.id(),
                            start = batch.start(),
                            size = batch.len(),
                            matched = result.matched,
                            dropped = result.dropped.len(),
                            depth,
                            "Batch reconciled"
                        );
                        return Ok(result.batch);
                    }
                    format!("{} row(s), none correlated", rows.len())
                }
                SubmissionResult::NoMatch => "no match".to_string(),
                SubmissionResult::Failed(failure) => failure.to_string(),
            };

            if batch.len() == 1 {
                let record = &batch.records()[0];
                warn!(
                    backend = %backend.id(),
                    id = %record.id,
                    offset = batch.start(),
                    reason = %failure,
                    "Record isolated as unresolved"
                );
                return Ok(ReconciledBatch::from(vec![Outcome::unresolved(
                    record.id.clone(),
                    UnresolvedCause::IsolationFloor,
                )]));
            }

            let (left, right) = batch.split()?;
            warn!(
                backend = %backend.id(),
                start = batch.start(),
                size = batch.len(),
                reason = %failure,
                depth,
                "Batch failed, bisecting"
            );

            let merged = if concurrent {
                let (first, second) = tokio::join!(
                    self.isolate(left, backend, reconciler, concurrent, cancel, depth + 1),
                    self.isolate(right, backend, reconciler, concurrent, cancel, depth + 1),
                );
                let mut merged = first?;
                merged.extend(second?);
                merged
            } else {
                let mut merged = self
                    .isolate(left, backend, reconciler, concurrent, cancel, depth + 1)
                    .await?;
                merged.extend(
                    self.isolate(right, backend, reconciler, concurrent, cancel, depth + 1)
                        .await?,
                );
                merged
            };

            Ok(merged)
        }
        .boxed()
    }

    /// One paced, bounded backend call
    ///
    /// Timeouts and adapter panics come back as `SubmissionResult::Failed`.
    async fn attempt<B>(
        &self,
        batch: &Batch<'_>,
        backend: &B,
        cancel: &CancellationToken,
    ) -> EngineResult<SubmissionResult>
    where
        B: Backend + ?Sized,
    {
        self.pacer.wait(backend.id(), cancel).await?;

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            permit = self.call_slots.acquire() => permit.map_err(|_| EngineError::Cancelled)?,
        };

        debug!(
            backend = %backend.id(),
            start = batch.start(),
            size = batch.len(),
            "Submitting batch"
        );

        let call = AssertUnwindSafe(backend.submit(batch)).catch_unwind();
        let bounded = async {
            match self.call_timeout {
                Some(limit) => tokio::time::timeout(limit, call)
                    .await
                    .unwrap_or(Ok(SubmissionResult::Failed(BackendFailure::Timeout(limit)))),
                None => call.await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            result = bounded => Ok(result.unwrap_or_else(|_| {
                SubmissionResult::Failed(BackendFailure::Malformed(
                    "backend adapter panicked".to_string(),
                ))
            })),
        }
    }
}

//! Job progress observers
//!
//! The orchestrator reports each completed batch to an injected observer.
//! Observers are the only progress/logging hook exposed outside the
//! submission core.

use chrono::Utc;
use pepsub_common::events::{EventBus, JobEvent};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Job announced before the first batch is submitted
#[derive(Debug, Clone, PartialEq)]
pub struct JobStart {
    pub job_id: Uuid,
    pub backend_id: String,
    pub total_records: usize,
    pub total_batches: usize,
}

/// One fully reconciled planner batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchProgress {
    pub job_id: Uuid,
    /// 0-based planner index
    pub batch_index: usize,
    pub batch_size: usize,
    /// Wall time spent on this batch, bisection included
    pub elapsed: Duration,
    pub unresolved: usize,
    pub records_completed: usize,
    pub total_records: usize,
}

/// Final tallies of a job
#[derive(Debug, Clone, PartialEq)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub resolved: usize,
    pub unresolved: usize,
    pub unprocessed: usize,
    pub cancelled: bool,
    pub elapsed: Duration,
}

/// Receives per-batch progress from the orchestrator
pub trait ProgressObserver: Send + Sync {
    fn job_started(&self, _start: &JobStart) {}

    /// Called exactly once per completed batch
    fn batch_completed(&self, progress: &BatchProgress);

    fn job_finished(&self, _summary: &JobSummary) {}
}

/// Discards all progress
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn batch_completed(&self, _progress: &BatchProgress) {}
}

/// Logs progress through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn job_started(&self, start: &JobStart) {
        info!(
            job_id = %start.job_id,
            backend = %start.backend_id,
            records = start.total_records,
            batches = start.total_batches,
            "Submission job started"
        );
    }

    fn batch_completed(&self, progress: &BatchProgress) {
        info!(
            job_id = %progress.job_id,
            batch = progress.batch_index,
            size = progress.batch_size,
            unresolved = progress.unresolved,
            elapsed_ms = progress.elapsed.as_millis() as u64,
            progress = format!("{}/{}", progress.records_completed, progress.total_records),
            "Batch complete"
        );
    }

    fn job_finished(&self, summary: &JobSummary) {
        info!(
            job_id = %summary.job_id,
            resolved = summary.resolved,
            unresolved = summary.unresolved,
            unprocessed = summary.unprocessed,
            cancelled = summary.cancelled,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Submission job finished"
        );
    }
}

/// Publishes progress as [`JobEvent`]s on an [`EventBus`]
#[derive(Debug, Clone)]
pub struct EventBusObserver {
    bus: EventBus,
}

impl EventBusObserver {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

impl ProgressObserver for EventBusObserver {
    fn job_started(&self, start: &JobStart) {
        self.bus.emit_lossy(JobEvent::JobStarted {
            job_id: start.job_id,
            backend_id: start.backend_id.clone(),
            total_records: start.total_records,
            total_batches: start.total_batches,
            timestamp: Utc::now(),
        });
    }

    fn batch_completed(&self, progress: &BatchProgress) {
        self.bus.emit_lossy(JobEvent::BatchCompleted {
            job_id: progress.job_id,
            batch_index: progress.batch_index,
            batch_size: progress.batch_size,
            elapsed_ms: progress.elapsed.as_millis() as u64,
            unresolved: progress.unresolved,
            records_completed: progress.records_completed,
            total_records: progress.total_records,
            timestamp: Utc::now(),
        });
    }

    fn job_finished(&self, summary: &JobSummary) {
        self.bus.emit_lossy(JobEvent::JobFinished {
            job_id: summary.job_id,
            resolved: summary.resolved,
            unresolved: summary.unresolved,
            unprocessed: summary.unprocessed,
            cancelled: summary.cancelled,
            elapsed_ms: summary.elapsed.as_millis() as u64,
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_observer_publishes_batch_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let observer = EventBusObserver::new(bus);
        let job_id = Uuid::new_v4();

        observer.batch_completed(&BatchProgress {
            job_id,
            batch_index: 2,
            batch_size: 50,
            elapsed: Duration::from_millis(1500),
            unresolved: 1,
            records_completed: 150,
            total_records: 420,
        });

        match rx.recv().await.unwrap() {
            JobEvent::BatchCompleted {
                job_id: id,
                batch_index,
                elapsed_ms,
                records_completed,
                ..
            } => {
                assert_eq!(id, job_id);
                assert_eq!(batch_index, 2);
                assert_eq!(elapsed_ms, 1500);
                assert_eq!(records_completed, 150);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}

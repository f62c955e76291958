//! Job progress events and broadcast event bus
//!
//! Events are emitted by the submission engine's progress observers and can be
//! consumed by any number of subscribers (CLI progress, log shippers, tests).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Submission job lifecycle events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JobEvent {
    /// A job began submitting records to a backend
    JobStarted {
        job_id: Uuid,
        backend_id: String,
        total_records: usize,
        total_batches: usize,
        timestamp: DateTime<Utc>,
    },

    /// One planner batch was fully reconciled
    BatchCompleted {
        job_id: Uuid,
        batch_index: usize,
        batch_size: usize,
        elapsed_ms: u64,
        /// Unresolved outcomes within this batch
        unresolved: usize,
        /// Records reconciled so far, this batch included
        records_completed: usize,
        total_records: usize,
        timestamp: DateTime<Utc>,
    },

    /// A job finished, either complete or cancelled
    JobFinished {
        job_id: Uuid,
        resolved: usize,
        unresolved: usize,
        /// Records never submitted because the job was cancelled
        unprocessed: usize,
        cancelled: bool,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> Uuid {
        match self {
            JobEvent::JobStarted { job_id, .. }
            | JobEvent::BatchCompleted { job_id, .. }
            | JobEvent::JobFinished { job_id, .. } => *job_id,
        }
    }

    /// Event type name as serialized in the `type` tag
    pub fn event_type(&self) -> &'static str {
        match self {
            JobEvent::JobStarted { .. } => "JobStarted",
            JobEvent::BatchCompleted { .. } => "BatchCompleted",
            JobEvent::JobFinished { .. } => "JobFinished",
        }
    }
}

/// Broadcast bus for job events
///
/// Cloning the bus shares the underlying channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    pub fn emit(
        &self,
        event: JobEvent,
    ) -> Result<usize, broadcast::error::SendError<JobEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the absence of subscribers
    pub fn emit_lossy(&self, event: JobEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("No subscribers for job event");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

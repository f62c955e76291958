//! Scripted backend test double
//!
//! Used by unit and integration tests to simulate flaky upstreams: a script
//! closure decides the response for each submitted batch, and every call is
//! recorded so tests can assert on call counts, batch shapes and overlap.

use crate::backend::{Backend, BackendCapabilities};
use crate::planner::Batch;
use crate::types::{Label, RawRow, Record, SubmissionResult};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Script = dyn Fn(&[Record]) -> SubmissionResult + Send + Sync;

/// Backend whose responses come from a closure
pub struct ScriptedBackend {
    id: String,
    capabilities: BackendCapabilities,
    script: Arc<Script>,
    latency: Option<Duration>,
    calls: Mutex<Vec<Vec<String>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new<F>(id: impl Into<String>, script: F) -> Self
    where
        F: Fn(&[Record]) -> SubmissionResult + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            capabilities: BackendCapabilities::default(),
            script: Arc::new(script),
            latency: None,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Answers every record by id with `predict(record)`
    pub fn echo<F>(id: impl Into<String>, predict: F) -> Self
    where
        F: Fn(&Record) -> (Label, f64) + Send + Sync + 'static,
    {
        Self::new(id, move |records| {
            SubmissionResult::Rows(
                records
                    .iter()
                    .map(|r| {
                        let (label, score) = predict(r);
                        RawRow::by_id(r.id.clone(), label, score)
                    })
                    .collect(),
            )
        })
    }

    /// Fails any batch containing one of `poisoned`, answers the rest positively
    pub fn poisoned<I, S>(id: impl Into<String>, poisoned: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let poisoned: HashSet<String> = poisoned.into_iter().map(Into::into).collect();
        Self::new(id, move |records| {
            if records.iter().any(|r| poisoned.contains(&r.id)) {
                return SubmissionResult::failed_transport("upstream rejected batch");
            }
            SubmissionResult::Rows(
                records
                    .iter()
                    .map(|r| RawRow::by_id(r.id.clone(), Label::Positive, 0.75))
                    .collect(),
            )
        })
    }

    /// Fails every call
    pub fn always_failing(id: impl Into<String>) -> Self {
        Self::new(id, |_| SubmissionResult::failed_transport("connection refused"))
    }

    pub fn with_capabilities(mut self, capabilities: BackendCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Sleep this long inside every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Ids of every submitted batch, in call order
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }

    /// Highest number of calls observed running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    async fn submit(&self, batch: &Batch<'_>) -> SubmissionResult {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(batch.ids().map(str::to_string).collect());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        (self.script)(batch.records())
    }
}

/// Decrements the in-flight counter even when the call future is dropped
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

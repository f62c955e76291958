//! Backend health probe
//!
//! Submits a single known record and checks that a usable prediction comes
//! back. `monitor` repeats the probe on an interval and reports transitions
//! between online and offline.
//!
//! Probe calls share the backend's [`Pacer`] with regular submissions, and a
//! panicking adapter reports the backend offline instead of unwinding.

use crate::backend::Backend;
use crate::error::{EngineError, EngineResult};
use crate::pacer::Pacer;
use crate::planner::Batch;
use crate::reconciler::ResultReconciler;
use crate::types::{Record, SubmissionResult};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Probe verdict
#[derive(Debug, Clone, PartialEq)]
pub enum BackendHealth {
    Online { latency: Duration },
    Offline { reason: String },
}

impl BackendHealth {
    pub fn is_online(&self) -> bool {
        matches!(self, BackendHealth::Online { .. })
    }

    fn same_state(&self, other: &BackendHealth) -> bool {
        self.is_online() == other.is_online()
    }
}

/// Submit `record` alone and report whether the backend answered it
///
/// Waits for the backend's pacing slot first; `timeout` bounds only the call.
/// Returns `Err(Cancelled)` only if `cancel` fires while waiting or during the
/// call.
pub async fn probe<B>(
    backend: &B,
    record: &Record,
    pacer: &Pacer,
    timeout: Duration,
    cancel: &CancellationToken,
) -> EngineResult<BackendHealth>
where
    B: Backend + ?Sized,
{
    pacer.wait(backend.id(), cancel).await?;

    let records = std::slice::from_ref(record);
    let batch = Batch::new(records, 0);
    let started = Instant::now();

    let call =
        AssertUnwindSafe(tokio::time::timeout(timeout, backend.submit(&batch))).catch_unwind();
    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(EngineError::Cancelled),
        response = call => response,
    };

    let health = match response {
        Err(_) => BackendHealth::Offline {
            reason: "backend adapter panicked".to_string(),
        },
        Ok(Err(_)) => BackendHealth::Offline {
            reason: format!("no response within {:?}", timeout),
        },
        Ok(Ok(SubmissionResult::Failed(failure))) => BackendHealth::Offline {
            reason: failure.to_string(),
        },
        Ok(Ok(SubmissionResult::NoMatch)) => BackendHealth::Offline {
            reason: "probe record not matched".to_string(),
        },
        Ok(Ok(SubmissionResult::Rows(rows))) => {
            let reconciled =
                ResultReconciler::for_backend(&backend.capabilities()).reconcile(&batch, &rows);
            if reconciled.unresolved_count() == 0 {
                BackendHealth::Online {
                    latency: started.elapsed(),
                }
            } else {
                BackendHealth::Offline {
                    reason: "no usable prediction for probe record".to_string(),
                }
            }
        }
    };

    tracing::debug!(backend = %backend.id(), health = ?health, "Probe complete");
    Ok(health)
}

/// Probe every `interval` until cancelled, calling `on_change` on the first
/// result and on every online/offline transition
pub async fn monitor<B, F>(
    backend: &B,
    record: &Record,
    pacer: &Pacer,
    timeout: Duration,
    interval: Duration,
    cancel: &CancellationToken,
    mut on_change: F,
) where
    B: Backend + ?Sized,
    F: FnMut(&BackendHealth),
{
    let mut last: Option<BackendHealth> = None;

    loop {
        let health = match probe(backend, record, pacer, timeout, cancel).await {
            Ok(health) => health,
            Err(_) => return,
        };

        let changed = last.as_ref().map_or(true, |prev| !prev.same_state(&health));
        if changed {
            if health.is_online() {
                tracing::info!(backend = %backend.id(), "Backend is online");
            } else {
                tracing::warn!(backend = %backend.id(), health = ?health, "Backend is offline");
            }
            on_change(&health);
        }
        last = Some(health);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doubles::ScriptedBackend;
    use crate::types::{Label, RawRow};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn probe_record() -> Record {
        Record::new("TEST1", "AAAAGSVWGAVNYTSDCNGECKRRGYKGGYCGSFANVNCWCET")
    }

    #[tokio::test]
    async fn test_probe_online() {
        let backend = ScriptedBackend::echo("adam_svm", |_| (Label::Positive, 1.0));
        let health = probe(
            &backend,
            &probe_record(),
            &Pacer::unpaced(),
            Duration::from_secs(1),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(health.is_online());
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_probe_offline_on_failure() {
        let backend = ScriptedBackend::always_failing("adam_svm");
        let health = probe(
            &backend,
            &probe_record(),
            &Pacer::unpaced(),
            Duration::from_secs(1),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(matches!(health, BackendHealth::Offline { reason } if reason.contains("connection refused")));
    }

    #[tokio::test]
    async fn test_probe_offline_when_row_unusable() {
        let backend = ScriptedBackend::new("adam_svm", |_| {
            SubmissionResult::Rows(vec![RawRow::by_id("OTHER", Label::Positive, 0.5)])
        });
        let health = probe(
            &backend,
            &probe_record(),
            &Pacer::unpaced(),
            Duration::from_secs(1),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(!health.is_online());
    }

    #[tokio::test]
    async fn test_probe_offline_on_timeout() {
        let backend = ScriptedBackend::echo("adam_svm", |_| (Label::Positive, 1.0))
            .with_latency(Duration::from_millis(200));
        let health = probe(
            &backend,
            &probe_record(),
            &Pacer::unpaced(),
            Duration::from_millis(20),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(!health.is_online());
    }

    #[tokio::test]
    async fn test_monitor_reports_transitions_only() {
        // offline, offline, online, online, then cancel
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let backend = ScriptedBackend::new("adam_svm", move |records| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                SubmissionResult::failed_transport("down")
            } else {
                SubmissionResult::Rows(vec![RawRow::by_id(
                    records[0].id.clone(),
                    Label::Positive,
                    1.0,
                )])
            }
        });

        let cancel = CancellationToken::new();
        let changes = Arc::new(Mutex::new(Vec::new()));
        let seen = changes.clone();
        let stop = cancel.clone();

        monitor(
            &backend,
            &probe_record(),
            &Pacer::unpaced(),
            Duration::from_secs(1),
            Duration::from_millis(5),
            &cancel,
            move |health| {
                let mut seen = seen.lock().unwrap();
                seen.push(health.is_online());
                if health.is_online() {
                    stop.cancel();
                }
            },
        )
        .await;

        assert_eq!(*changes.lock().unwrap(), vec![false, true]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_panicking_adapter_reports_offline() {
        let backend = ScriptedBackend::new("adam_svm", |_| panic!("adapter bug"));
        let health = probe(
            &backend,
            &probe_record(),
            &Pacer::unpaced(),
            Duration::from_secs(1),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(matches!(health, BackendHealth::Offline { reason } if reason.contains("panicked")));
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_monitor_survives_adapter_panics() {
        // panic, then online
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let backend = ScriptedBackend::new("adam_svm", move |records| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("adapter bug");
            }
            SubmissionResult::Rows(vec![RawRow::by_id(
                records[0].id.clone(),
                Label::Positive,
                1.0,
            )])
        });

        let cancel = CancellationToken::new();
        let changes = Arc::new(Mutex::new(Vec::new()));
        let seen = changes.clone();
        let stop = cancel.clone();

        monitor(
            &backend,
            &probe_record(),
            &Pacer::unpaced(),
            Duration::from_secs(1),
            Duration::from_millis(5),
            &cancel,
            move |health| {
                seen.lock().unwrap().push(health.is_online());
                if health.is_online() {
                    stop.cancel();
                }
            },
        )
        .await;

        assert_eq!(*changes.lock().unwrap(), vec![false, true]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_checks_share_backend_pacing() {
        let backend = ScriptedBackend::echo("adam_svm", |_| (Label::Positive, 1.0));
        let pacer = Pacer::new(Duration::from_millis(150));
        let cancel = CancellationToken::new();

        let start = Instant::now();
        for _ in 0..2 {
            let health = probe(&backend, &probe_record(), &pacer, Duration::from_secs(1), &cancel)
                .await
                .unwrap();
            assert!(health.is_online());
        }

        // Allow for limiter clock granularity
        assert!(start.elapsed() >= Duration::from_millis(120));
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_token_skips_backend_call() {
        let backend = ScriptedBackend::echo("adam_svm", |_| (Label::Positive, 1.0));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = probe(
            &backend,
            &probe_record(),
            &Pacer::new(Duration::from_secs(5)),
            Duration::from_secs(1),
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(EngineError::Cancelled)));
        assert_eq!(backend.call_count(), 0);
    }
}

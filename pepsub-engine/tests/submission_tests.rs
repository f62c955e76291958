//! Integration tests for job submission
//!
//! Drives `JobOrchestrator` end to end against scripted backends:
//! completeness, ordering, fault isolation, pacing, cancellation and progress
//! reporting.

use pepsub_common::events::EventBus;
use pepsub_engine::doubles::ScriptedBackend;
use pepsub_engine::progress::{BatchProgress, EventBusObserver, ProgressObserver};
use pepsub_engine::{
    BackendCapabilities, CorrelationMode, EngineError, JobCompletion, JobOrchestrator, Label,
    Outcome, Pacer, RawRow, Record, SubmissionResult, TieBreak, UnresolvedCause,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Helpers
// ============================================================================

fn records(n: usize) -> Vec<Record> {
    (1..=n)
        .map(|i| Record::new(format!("P{}", i), format!("GIGKFLHSAKKFGKAFVGEIMNS{}", i)))
        .collect()
}

fn ids(outcomes: &[Outcome]) -> Vec<String> {
    outcomes.iter().map(|o| o.id.clone()).collect()
}

fn unpaced() -> JobOrchestrator {
    JobOrchestrator::new(Arc::new(Pacer::unpaced()))
}

#[derive(Default)]
struct RecordingObserver {
    batches: Mutex<Vec<BatchProgress>>,
}

impl ProgressObserver for RecordingObserver {
    fn batch_completed(&self, progress: &BatchProgress) {
        self.batches.lock().unwrap().push(progress.clone());
    }
}

/// Cancels the job once `after` batches have completed
struct CancelAfter {
    after: usize,
    seen: Mutex<usize>,
    token: CancellationToken,
}

impl ProgressObserver for CancelAfter {
    fn batch_completed(&self, _progress: &BatchProgress) {
        let mut seen = self.seen.lock().unwrap();
        *seen += 1;
        if *seen == self.after {
            self.token.cancel();
        }
    }
}

// ============================================================================
// Job-level guarantees
// ============================================================================

#[tokio::test]
async fn test_end_to_end_first_batch_failing() {
    let backend = ScriptedBackend::new("stub", |batch: &[Record]| {
        if batch.iter().any(|r| r.id == "P1" || r.id == "P2") {
            return SubmissionResult::failed_transport("503 Service Unavailable");
        }
        SubmissionResult::Rows(vec![
            RawRow::by_id("P3", Label::Positive, 0.9),
            RawRow::by_id("P4", Label::Negative, 0.1),
        ])
    });
    let input = vec![
        Record::new("P1", "AAA"),
        Record::new("P2", "BBB"),
        Record::new("P3", "CCC"),
        Record::new("P4", "DDD"),
    ];

    let report = unpaced()
        .run(&input, &backend, 2, &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(
        report.outcomes,
        vec![
            Outcome::unresolved("P1", UnresolvedCause::IsolationFloor),
            Outcome::unresolved("P2", UnresolvedCause::IsolationFloor),
            Outcome::resolved("P3", Label::Positive, 0.9),
            Outcome::resolved("P4", Label::Negative, 0.1),
        ]
    );
    // [P1,P2] -> [P1], [P2] -> [P3,P4]
    assert_eq!(backend.call_count(), 4);
}

#[tokio::test]
async fn test_completeness_and_order_under_scattered_failures() {
    let poisoned = ["P3", "P17", "P18", "P40"];
    let backend = ScriptedBackend::poisoned("stub", poisoned);
    let input = records(45);

    let report = unpaced()
        .run(&input, &backend, 10, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), input.len());
    assert_eq!(
        ids(&report.outcomes),
        input.iter().map(|r| r.id.clone()).collect::<Vec<_>>()
    );

    let unique: HashSet<_> = report.outcomes.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(unique.len(), input.len());

    let mut unresolved = report.unresolved_ids();
    unresolved.sort();
    let mut expected = poisoned.to_vec();
    expected.sort();
    assert_eq!(unresolved, expected);
}

#[tokio::test]
async fn test_always_failing_backend_yields_all_unresolved() {
    let backend = ScriptedBackend::always_failing("stub");
    let input = records(5);

    let report = unpaced()
        .run(&input, &backend, 5, &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.unresolved_count(), 5);
    // full binary tree over 5 leaves
    assert_eq!(backend.call_count(), 9);
}

#[tokio::test]
async fn test_concurrency_safe_backend_keeps_order() {
    let backend = ScriptedBackend::poisoned("stub", ["P2", "P7"])
        .with_capabilities(BackendCapabilities {
            concurrency_safe: true,
            ..BackendCapabilities::default()
        })
        .with_latency(Duration::from_millis(5));
    let input = records(16);

    let report = unpaced()
        .run(&input, &backend, 16, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        ids(&report.outcomes),
        input.iter().map(|r| r.id.clone()).collect::<Vec<_>>()
    );
    assert_eq!(report.unresolved_ids(), vec!["P2", "P7"]);
}

#[tokio::test]
async fn test_stateful_backend_never_sees_overlapping_calls() {
    let backend = ScriptedBackend::poisoned("stub", ["P1", "P9", "P12"])
        .with_latency(Duration::from_millis(2));

    unpaced()
        .run(&records(12), &backend, 6, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(backend.max_in_flight(), 1);
}

#[tokio::test]
async fn test_index_backend_with_min_score_tie_break() {
    // One row per scanning window, 1-based positions
    let backend = ScriptedBackend::new("window_scan", |batch: &[Record]| {
        let mut rows = Vec::new();
        for (i, _) in batch.iter().enumerate() {
            rows.push(RawRow::by_index(i + 1, Label::Positive, 0.7));
            rows.push(RawRow::by_index(i + 1, Label::Positive, 0.3));
        }
        SubmissionResult::Rows(rows)
    })
    .with_capabilities(BackendCapabilities {
        correlation_mode: CorrelationMode::ByIndex { origin: 1 },
        duplicate_tie_break: TieBreak::MinScore,
        ..BackendCapabilities::default()
    });

    let report = unpaced()
        .run(&records(3), &backend, 3, &CancellationToken::new())
        .await
        .unwrap();

    assert!(report
        .outcomes
        .iter()
        .all(|o| o.label == Label::Positive && o.score == Some(0.3)));
}

#[tokio::test]
async fn test_unreported_ids_are_marked_not_reported() {
    // Answers only the first record of every batch
    let backend = ScriptedBackend::new("sparse", |batch: &[Record]| {
        SubmissionResult::Rows(vec![RawRow::by_id(
            batch[0].id.clone(),
            Label::Negative,
            0.05,
        )])
    });

    let report = unpaced()
        .run(&records(4), &backend, 2, &CancellationToken::new())
        .await
        .unwrap();

    let causes: Vec<_> = report.outcomes.iter().map(|o| o.cause).collect();
    assert_eq!(
        causes,
        vec![
            None,
            Some(UnresolvedCause::NotReported),
            None,
            Some(UnresolvedCause::NotReported),
        ]
    );
    assert_eq!(backend.call_count(), 2);
}

#[tokio::test]
async fn test_configured_orchestrator_rejects_oversized_batches() {
    let config = pepsub_common::config::TomlConfig::default();
    let orchestrator = JobOrchestrator::from_config(&config).unwrap();
    let backend = ScriptedBackend::always_failing("stub");

    let err = orchestrator
        .run(&records(3), &backend, 51, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidConfiguration(_)));
}

// ============================================================================
// Pacing
// ============================================================================

#[tokio::test]
async fn test_batches_are_paced() {
    let pacer = Pacer::unpaced().with_interval("slow", Duration::from_millis(40));
    let orchestrator = JobOrchestrator::new(Arc::new(pacer));
    let backend = ScriptedBackend::echo("slow", |_| (Label::Negative, 0.4));

    let started = Instant::now();
    let report = orchestrator
        .run(&records(3), &backend, 1, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.batches_completed, 3);
    // three calls, two enforced gaps
    assert!(started.elapsed() >= Duration::from_millis(70));
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_between_batches_reports_unprocessed() {
    let token = CancellationToken::new();
    let observer = Arc::new(CancelAfter {
        after: 1,
        seen: Mutex::new(0),
        token: token.clone(),
    });
    let orchestrator = unpaced().with_observer(observer);
    let backend = ScriptedBackend::echo("stub", |_| (Label::Positive, 0.6));

    let report = orchestrator
        .run(&records(6), &backend, 2, &token)
        .await
        .unwrap();

    assert_eq!(ids(&report.outcomes), vec!["P1", "P2"]);
    assert_eq!(report.batches_completed, 1);
    assert_eq!(
        report.completion,
        JobCompletion::Cancelled {
            unprocessed: vec![
                "P3".to_string(),
                "P4".to_string(),
                "P5".to_string(),
                "P6".to_string()
            ]
        }
    );
    assert_eq!(backend.call_count(), 1);
}

#[tokio::test]
async fn test_cancel_during_backend_call_discards_batch() {
    let token = CancellationToken::new();
    let backend = ScriptedBackend::echo("stub", |_| (Label::Positive, 0.6))
        .with_latency(Duration::from_secs(30));

    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let report = unpaced()
        .run(&records(4), &backend, 2, &token)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(report.outcomes.is_empty());
    assert_eq!(report.unprocessed_ids().len(), 4);
}

#[tokio::test]
async fn test_cancel_during_pacer_wait() {
    let token = CancellationToken::new();
    let pacer = Pacer::new(Duration::from_secs(60));
    let orchestrator = JobOrchestrator::new(Arc::new(pacer));
    let backend = ScriptedBackend::echo("stub", |_| (Label::Negative, 0.2));

    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let report = orchestrator
        .run(&records(2), &backend, 1, &token)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    // first call goes through immediately, second waits on the pacer
    assert_eq!(ids(&report.outcomes), vec!["P1"]);
    assert_eq!(report.unprocessed_ids(), &["P2".to_string()]);
}

// ============================================================================
// Progress reporting
// ============================================================================

#[tokio::test]
async fn test_observer_called_once_per_batch() {
    let observer = Arc::new(RecordingObserver::default());
    let orchestrator = unpaced().with_observer(observer.clone());
    let backend = ScriptedBackend::poisoned("stub", ["P5"]);

    orchestrator
        .run(&records(7), &backend, 3, &CancellationToken::new())
        .await
        .unwrap();

    let batches = observer.batches.lock().unwrap();
    let shape: Vec<_> = batches
        .iter()
        .map(|b| (b.batch_index, b.batch_size, b.unresolved, b.records_completed))
        .collect();
    assert_eq!(shape, vec![(0, 3, 0, 3), (1, 3, 1, 6), (2, 1, 0, 7)]);
    assert!(batches.iter().all(|b| b.total_records == 7));
}

#[tokio::test]
async fn test_event_bus_receives_job_lifecycle() {
    let bus = EventBus::new(32);
    let mut rx = bus.subscribe();
    let orchestrator = unpaced().with_observer(Arc::new(EventBusObserver::new(bus)));
    let backend = ScriptedBackend::echo("stub", |_| (Label::Positive, 0.8));

    let report = orchestrator
        .run(&records(4), &backend, 2, &CancellationToken::new())
        .await
        .unwrap();

    let mut types = Vec::new();
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.job_id(), report.job_id);
        types.push(event.event_type());
    }
    assert_eq!(
        types,
        vec!["JobStarted", "BatchCompleted", "BatchCompleted", "JobFinished"]
    );
}

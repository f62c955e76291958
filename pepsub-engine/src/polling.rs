//! Remote job status polling
//!
//! Helper for backends built on a submit-job / poll-status / fetch-result flow.
//! The adapter supplies a status check; [`poll_until_ready`] repeats it at a
//! fixed interval until the remote job is ready or failed, gives up after a
//! maximum wait, and aborts as soon as the job is cancelled.
//!
//! A timed-out or failed poll converts into a [`BackendFailure`], so the
//! adapter can return it as `SubmissionResult::Failed` and let bisection take
//! over.

use crate::types::BackendFailure;
use pepsub_common::config::EngineSettings;
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Status check cadence and give-up bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_wait: Duration) -> Self {
        Self { interval, max_wait }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(settings.poll_interval(), settings.poll_max_wait())
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from_settings(&EngineSettings::default())
    }
}

/// One status check result
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus<T> {
    Pending,
    Ready(T),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PollError {
    #[error("Remote job failed: {0}")]
    Failed(String),

    #[error("Remote job not ready after {attempts} checks ({elapsed:?})")]
    TimedOut { attempts: u32, elapsed: Duration },

    #[error("Polling cancelled")]
    Cancelled,
}

impl From<PollError> for BackendFailure {
    fn from(err: PollError) -> Self {
        match err {
            PollError::Failed(reason) => BackendFailure::JobFailed(reason),
            PollError::TimedOut { elapsed, .. } => BackendFailure::Timeout(elapsed),
            PollError::Cancelled => BackendFailure::JobFailed("polling cancelled".to_string()),
        }
    }
}

/// Check `check` until it reports `Ready` or `Failed`
///
/// The first check runs immediately. After `policy.max_wait` has elapsed
/// without a terminal status, returns `TimedOut`.
pub async fn poll_until_ready<T, F, Fut>(
    policy: PollPolicy,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<T, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PollStatus<T>>,
{
    let started = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            status = check() => status,
        };

        match status {
            PollStatus::Ready(value) => {
                if attempts > 1 {
                    tracing::debug!(
                        attempts,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Remote job ready"
                    );
                }
                return Ok(value);
            }
            PollStatus::Failed(reason) => {
                tracing::warn!(attempts, reason = %reason, "Remote job reported failure");
                return Err(PollError::Failed(reason));
            }
            PollStatus::Pending => {}
        }

        let elapsed = started.elapsed();
        if elapsed >= policy.max_wait {
            tracing::warn!(
                attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                max_wait_ms = policy.max_wait.as_millis() as u64,
                "Remote job still pending, giving up"
            );
            return Err(PollError::TimedOut { attempts, elapsed });
        }

        let pause = policy.interval.min(policy.max_wait - elapsed);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            _ = tokio::time::sleep(pause) => {}
        }
    }
}

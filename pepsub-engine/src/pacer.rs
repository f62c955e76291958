//! Per-backend request pacing
//!
//! Enforces a minimum interval between consecutive submissions to the same
//! backend. Each backend id gets its own GCRA limiter with a burst of one, so
//! the first call after an idle period proceeds immediately and every
//! following call waits out the remainder of the interval.

use crate::error::{EngineError, EngineResult};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use pepsub_common::config::TomlConfig;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Cooperative throttle shared by every submission against a set of backends
pub struct Pacer {
    default_interval: Duration,
    overrides: HashMap<String, Duration>,
    limiters: Mutex<HashMap<String, Option<Arc<DefaultDirectRateLimiter>>>>,
}

impl Pacer {
    pub fn new(default_interval: Duration) -> Self {
        Self {
            default_interval,
            overrides: HashMap::new(),
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Pacer that never waits (tests, local backends)
    pub fn unpaced() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Use a different interval for one backend
    pub fn with_interval(mut self, backend_id: impl Into<String>, interval: Duration) -> Self {
        self.overrides.insert(backend_id.into(), interval);
        self
    }

    /// Build from configuration, honouring `[backends.<id>]` overrides
    pub fn from_config(config: &TomlConfig) -> Self {
        let mut pacer = Self::new(config.engine.pace_interval());
        for backend_id in config.backends.keys() {
            pacer = pacer.with_interval(backend_id.clone(), config.pace_interval_for(backend_id));
        }
        pacer
    }

    pub fn interval_for(&self, backend_id: &str) -> Duration {
        self.overrides
            .get(backend_id)
            .copied()
            .unwrap_or(self.default_interval)
    }

    /// Wait until a call to `backend_id` is permitted
    ///
    /// Returns `Cancelled` as soon as `cancel` fires, abandoning the wait.
    pub async fn wait(&self, backend_id: &str, cancel: &CancellationToken) -> EngineResult<()> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let Some(limiter) = self.limiter_for(backend_id) else {
            return Ok(());
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(backend = %backend_id, "Pacer wait cancelled");
                Err(EngineError::Cancelled)
            }
            _ = limiter.until_ready() => Ok(()),
        }
    }

    /// `None` for backends paced with a zero interval
    fn limiter_for(&self, backend_id: &str) -> Option<Arc<DefaultDirectRateLimiter>> {
        let mut limiters = self
            .limiters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let limiter = limiters.entry(backend_id.to_string()).or_insert_with(|| {
            let interval = self.interval_for(backend_id);
            tracing::debug!(backend = %backend_id, interval = ?interval, "Creating pacer");
            Quota::with_period(interval).map(|quota| Arc::new(RateLimiter::direct(quota)))
        });

        limiter.clone()
    }
}

impl Default for Pacer {
    fn default() -> Self {
        Self::new(pepsub_common::config::EngineSettings::default().pace_interval())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_interval_overrides() {
        let pacer = Pacer::new(Duration::from_millis(500))
            .with_interval("dbaasp", Duration::from_millis(50));
        assert_eq!(pacer.interval_for("dbaasp"), Duration::from_millis(50));
        assert_eq!(pacer.interval_for("adam_svm"), Duration::from_millis(500));
    }

    #[test]
    fn test_from_config_uses_backend_overrides() {
        let config: TomlConfig = toml::from_str(
            "[engine]\npace_interval_ms = 200\n[backends.camp_rf]\npace_interval_ms = 20\n",
        )
        .unwrap();
        let pacer = Pacer::from_config(&config);
        assert_eq!(pacer.interval_for("camp_rf"), Duration::from_millis(20));
        assert_eq!(pacer.interval_for("other"), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_unpaced_never_waits() {
        let pacer = Pacer::unpaced();
        let cancel = CancellationToken::new();
        let start = Instant::now();
        for _ in 0..20 {
            pacer.wait("local", &cancel).await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_consecutive_waits_respect_interval() {
        let pacer = Pacer::new(Duration::from_millis(150));
        let cancel = CancellationToken::new();

        pacer.wait("ampa", &cancel).await.unwrap();
        let start = Instant::now();
        pacer.wait("ampa", &cancel).await.unwrap();

        // Allow for limiter clock granularity
        assert!(
            start.elapsed() >= Duration::from_millis(120),
            "Second call should wait ~150ms, waited {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn test_backends_are_paced_independently() {
        let pacer = Pacer::new(Duration::from_secs(10));
        let cancel = CancellationToken::new();

        pacer.wait("adam_svm", &cancel).await.unwrap();
        let start = Instant::now();
        pacer.wait("adam_hmm", &cancel).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_pending_wait() {
        let pacer = Pacer::new(Duration::from_secs(30));
        let cancel = CancellationToken::new();
        pacer.wait("dbaasp", &cancel).await.unwrap();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let result = pacer.wait("dbaasp", &cancel).await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_wait_on_cancelled_token_fails_immediately() {
        let pacer = Pacer::unpaced();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            pacer.wait("any", &cancel).await,
            Err(EngineError::Cancelled)
        ));
    }
}

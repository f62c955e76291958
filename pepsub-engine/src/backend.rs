//! Backend trait and capability descriptor
//!
//! A backend adapter wraps one upstream prediction service. The engine knows
//! nothing about its transport; it only relies on the declared capabilities to
//! decide how rows correlate, how duplicates resolve, and whether bisection
//! branches may run concurrently.

use crate::planner::Batch;
use crate::types::SubmissionResult;
use async_trait::async_trait;

/// How returned rows identify the record they belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationMode {
    /// Rows carry the record id
    ById,
    /// Rows carry the record's position in the submitted batch, counted from `origin`
    ByIndex { origin: usize },
}

/// Which row wins when a backend reports the same record more than once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreak {
    /// Keep the first occurrence
    First,
    /// Keep the lowest score (window-based predictors report one row per window)
    MinScore,
}

/// Capability descriptor declared by every backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub correlation_mode: CorrelationMode,
    /// Largest batch the upstream accepts
    pub max_batch_size: usize,
    pub duplicate_tie_break: TieBreak,
    /// Stateless request/response backends may serve bisection halves concurrently
    pub concurrency_safe: bool,
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self {
            correlation_mode: CorrelationMode::ById,
            max_batch_size: 50,
            duplicate_tie_break: TieBreak::First,
            concurrency_safe: false,
        }
    }
}

/// Upstream prediction service adapter
///
/// `submit` must report transport, parse and remote-job failures as
/// [`SubmissionResult::Failed`] instead of panicking. Adapters holding session
/// state (browser sessions, single job slots) must declare
/// `concurrency_safe: false`; the engine then never issues overlapping calls.
///
/// # Example
/// ```rust,ignore
/// use pepsub_engine::{Backend, BackendCapabilities, Batch, SubmissionResult};
///
/// pub struct AdamSvm { client: reqwest::Client }
///
/// #[async_trait::async_trait]
/// impl Backend for AdamSvm {
///     fn id(&self) -> &str { "adam_svm" }
///     fn capabilities(&self) -> BackendCapabilities { BackendCapabilities::default() }
///
///     async fn submit(&self, batch: &Batch<'_>) -> SubmissionResult {
///         match self.post_form(&batch.to_fasta()).await {
///             Ok(rows) if rows.is_empty() => SubmissionResult::NoMatch,
///             Ok(rows) => SubmissionResult::Rows(rows),
///             Err(e) => SubmissionResult::failed_transport(e.to_string()),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Backend: Send + Sync {
    /// Stable identifier used for pacing, logging and configuration overrides
    fn id(&self) -> &str;

    fn capabilities(&self) -> BackendCapabilities;

    /// Submit one batch and return the raw response
    async fn submit(&self, batch: &Batch<'_>) -> SubmissionResult;
}

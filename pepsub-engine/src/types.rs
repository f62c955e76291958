//! Core data types for the submission engine
//!
//! - **Record**: one sequence to be scored, identified by a stable id
//! - **Outcome**: the reconciled verdict for one record
//! - **RawRow / SubmissionResult**: what a backend hands back for a batch

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Numeric marker written for unresolved labels and scores at the file boundary
pub const UNRESOLVED_SENTINEL: i32 = -999;

// ============================================================================
// Input
// ============================================================================

/// One sequence to be scored
///
/// Created once at job start and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Record {
    /// Unique within a job
    pub id: String,
    /// Opaque payload passed to backends
    pub sequence: String,
}

impl Record {
    pub fn new(id: impl Into<String>, sequence: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sequence: sequence.into(),
        }
    }
}

// ============================================================================
// Output
// ============================================================================

/// Prediction label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    Negative,
    Positive,
    /// No usable prediction was obtained
    Unresolved,
}

impl Label {
    /// Integer code used in result tables (`0`, `1`, `-999`)
    pub fn code(self) -> i32 {
        match self {
            Label::Negative => 0,
            Label::Positive => 1,
            Label::Unresolved => UNRESOLVED_SENTINEL,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Label::Negative),
            1 => Some(Label::Positive),
            UNRESOLVED_SENTINEL => Some(Label::Unresolved),
            _ => None,
        }
    }

    pub fn is_resolved(self) -> bool {
        self != Label::Unresolved
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Why an outcome is unresolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnresolvedCause {
    /// Bisection reached a single record and the backend still failed on it
    IsolationFloor,
    /// The backend processed the batch but returned nothing for this id
    NotReported,
    /// Read back from a result table, cause not recorded
    Unknown,
}

/// Reconciled verdict for one record
///
/// Exactly one outcome exists per input record. Unresolved outcomes carry no
/// score; the `-999` sentinel is produced only when writing result tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub id: String,
    pub label: Label,
    /// Probability in `[0, 1]` for resolved outcomes
    pub score: Option<f64>,
    /// Set only for unresolved outcomes
    pub cause: Option<UnresolvedCause>,
}

impl Outcome {
    /// Resolved outcome; `label` must not be [`Label::Unresolved`]
    pub fn resolved(id: impl Into<String>, label: Label, score: f64) -> Self {
        debug_assert!(label.is_resolved(), "resolved outcome with unresolved label");
        Self {
            id: id.into(),
            label,
            score: Some(score),
            cause: None,
        }
    }

    pub fn unresolved(id: impl Into<String>, cause: UnresolvedCause) -> Self {
        Self {
            id: id.into(),
            label: Label::Unresolved,
            score: None,
            cause: Some(cause),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.label.is_resolved()
    }

    /// Score as written to result tables (`-999` when unresolved)
    pub fn sentinel_score(&self) -> f64 {
        self.score.unwrap_or(f64::from(UNRESOLVED_SENTINEL))
    }
}

// ============================================================================
// Backend responses
// ============================================================================

/// How a raw row refers back to the requested batch
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RowKey {
    /// Explicit record id
    Id(String),
    /// Position within the submitted batch (origin declared by the backend)
    Index(usize),
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Id(id) => write!(f, "id '{}'", id),
            RowKey::Index(index) => write!(f, "index {}", index),
        }
    }
}

/// One prediction row as returned by a backend, before reconciliation
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub key: RowKey,
    pub label: Label,
    pub score: f64,
}

impl RawRow {
    pub fn by_id(id: impl Into<String>, label: Label, score: f64) -> Self {
        Self {
            key: RowKey::Id(id.into()),
            label,
            score,
        }
    }

    pub fn by_index(index: usize, label: Label, score: f64) -> Self {
        Self {
            key: RowKey::Index(index),
            label,
            score,
        }
    }
}

/// Backend failure signal
///
/// Recoverable: triggers bisection and never surfaces as a job error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendFailure {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Backend call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Remote job reported failure or never became ready
    #[error("Remote job failed: {0}")]
    JobFailed(String),
}

/// Raw response from a backend for one batch
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionResult {
    /// Rows loosely correlated to the batch's records
    Rows(Vec<RawRow>),
    /// The backend answered but matched nothing
    NoMatch,
    Failed(BackendFailure),
}

impl SubmissionResult {
    pub fn failed_transport(message: impl Into<String>) -> Self {
        SubmissionResult::Failed(BackendFailure::Transport(message.into()))
    }
}

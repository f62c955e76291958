//! Error types for pepsub-engine
//!
//! Only configuration errors, internal invariant violations and cancellation
//! surface here. Backend failures and malformed rows are absorbed locally
//! (see [`crate::types::BackendFailure`] and [`crate::reconciler::CorrelationError`]).

use thiserror::Error;

/// Engine error type
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad batch size or other setup parameter; fatal, never retried
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Bisection or planning produced a zero-size batch
    #[error("Empty batch: {0}")]
    EmptyBatch(String),

    /// Job-level cancellation
    #[error("Job cancelled")]
    Cancelled,

    /// Malformed input file content (FASTA, result table)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration rejected by pepsub-common
    #[error("Common error: {0}")]
    Common(#[from] pepsub_common::Error),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

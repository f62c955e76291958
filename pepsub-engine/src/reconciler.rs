//! Result reconciliation
//!
//! Maps raw, possibly incomplete, duplicated or unordered backend rows onto the
//! exact set of ids requested in a batch. The output always holds one outcome
//! per batch record, in batch order.

use crate::backend::{BackendCapabilities, CorrelationMode, TieBreak};
use crate::planner::Batch;
use crate::types::{Label, Outcome, RawRow, RowKey, UnresolvedCause};
use std::collections::HashMap;
use thiserror::Error;

/// A single raw row that cannot be attributed to the batch
///
/// Recovered locally: the row is logged and dropped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CorrelationError {
    #[error("Row references id '{0}' which is not in the batch")]
    UnknownId(String),

    #[error("Row references index {index} outside batch of {batch_len}")]
    IndexOutOfRange { index: usize, batch_len: usize },

    #[error("Row keyed by {0} but backend correlates {1}")]
    KeyMismatch(String, &'static str),

    #[error("Row for {key} has unusable label {label:?} / score {score}")]
    InvalidPrediction { key: String, label: Label, score: f64 },
}

/// Outcome list covering exactly one batch, in batch order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciledBatch {
    outcomes: Vec<Outcome>,
}

impl ReconciledBatch {
    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> Vec<Outcome> {
        self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn unresolved_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_resolved()).count()
    }

    /// Append another batch's outcomes (bisection halves, in order)
    pub fn extend(&mut self, other: ReconciledBatch) {
        self.outcomes.extend(other.outcomes);
    }
}

impl From<Vec<Outcome>> for ReconciledBatch {
    fn from(outcomes: Vec<Outcome>) -> Self {
        Self { outcomes }
    }
}

/// Reconciled batch plus bookkeeping about the raw rows
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub batch: ReconciledBatch,
    /// Batch records that received at least one valid row
    pub matched: usize,
    /// Rows dropped during correlation
    pub dropped: Vec<CorrelationError>,
}

/// Reconciles backend rows under one backend's correlation and tie-break policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultReconciler {
    mode: CorrelationMode,
    tie_break: TieBreak,
}

impl ResultReconciler {
    pub fn new(mode: CorrelationMode, tie_break: TieBreak) -> Self {
        Self { mode, tie_break }
    }

    pub fn for_backend(capabilities: &BackendCapabilities) -> Self {
        Self::new(capabilities.correlation_mode, capabilities.duplicate_tie_break)
    }

    /// Map `rows` onto `batch`, synthesizing `NotReported` for silent ids
    pub fn reconcile(&self, batch: &Batch<'_>, rows: &[RawRow]) -> ReconciledBatch {
        self.reconcile_with_stats(batch, rows).batch
    }

    pub fn reconcile_with_stats(&self, batch: &Batch<'_>, rows: &[RawRow]) -> Reconciliation {
        let positions: HashMap<&str, usize> = match self.mode {
            CorrelationMode::ById => batch.ids().enumerate().map(|(i, id)| (id, i)).collect(),
            CorrelationMode::ByIndex { .. } => HashMap::new(),
        };

        let mut best: Vec<Option<(Label, f64)>> = vec![None; batch.len()];
        let mut dropped = Vec::new();

        for row in rows {
            let position = match self.correlate(batch, &positions, row) {
                Ok(position) => position,
                Err(e) => {
                    tracing::warn!(
                        batch_start = batch.start(),
                        batch_len = batch.len(),
                        error = %e,
                        "Dropping uncorrelated row"
                    );
                    dropped.push(e);
                    continue;
                }
            };

            match best[position] {
                None => best[position] = Some((row.label, row.score)),
                Some((_, kept_score)) => {
                    let replace = match self.tie_break {
                        TieBreak::First => false,
                        TieBreak::MinScore => row.score < kept_score,
                    };
                    if replace {
                        best[position] = Some((row.label, row.score));
                    }
                }
            }
        }

        let matched = best.iter().filter(|b| b.is_some()).count();
        let outcomes = batch
            .records()
            .iter()
            .zip(best)
            .map(|(record, prediction)| match prediction {
                Some((label, score)) => Outcome::resolved(record.id.clone(), label, score),
                None => Outcome::unresolved(record.id.clone(), UnresolvedCause::NotReported),
            })
            .collect::<Vec<_>>();

        Reconciliation {
            batch: ReconciledBatch::from(outcomes),
            matched,
            dropped,
        }
    }

    fn correlate(
        &self,
        batch: &Batch<'_>,
        positions: &HashMap<&str, usize>,
        row: &RawRow,
    ) -> Result<usize, CorrelationError> {
        let position = match (&self.mode, &row.key) {
            (CorrelationMode::ById, RowKey::Id(id)) => *positions
                .get(id.as_str())
                .ok_or_else(|| CorrelationError::UnknownId(id.clone()))?,
            (CorrelationMode::ByIndex { origin }, RowKey::Index(index)) => index
                .checked_sub(*origin)
                .filter(|p| *p < batch.len())
                .ok_or(CorrelationError::IndexOutOfRange {
                    index: *index,
                    batch_len: batch.len(),
                })?,
            (CorrelationMode::ById, key) => {
                return Err(CorrelationError::KeyMismatch(key.to_string(), "by id"))
            }
            (CorrelationMode::ByIndex { .. }, key) => {
                return Err(CorrelationError::KeyMismatch(key.to_string(), "by index"))
            }
        };

        // NaN fails the range check
        let usable = row.label.is_resolved() && (0.0..=1.0).contains(&row.score);
        if !usable {
            return Err(CorrelationError::InvalidPrediction {
                key: row.key.to_string(),
                label: row.label,
                score: row.score,
            });
        }

        Ok(position)
    }
}

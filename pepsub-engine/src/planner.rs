//! Batch planning
//!
//! Partitions an ordered record stream into request-sized batches. Batches are
//! borrowed views into the job's records, so planning and bisection never copy
//! record data.

use crate::error::{EngineError, EngineResult};
use crate::types::Record;

/// Ordered, contiguous view over a job's records
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Batch<'a> {
    records: &'a [Record],
    /// Offset of the first record within the job
    start: usize,
}

impl<'a> Batch<'a> {
    pub fn new(records: &'a [Record], start: usize) -> Self {
        Self { records, start }
    }

    pub fn records(&self) -> &'a [Record] {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn start(&self) -> usize {
        self.start
    }

    /// Offset one past the last record within the job
    pub fn end(&self) -> usize {
        self.start + self.records.len()
    }

    pub fn ids(&self) -> impl Iterator<Item = &'a str> + 'a {
        self.records.iter().map(|r| r.id.as_str())
    }

    /// Split into two halves, the larger half first
    ///
    /// A batch of `n` records splits as `ceil(n/2)` / `floor(n/2)`. Fails with
    /// `EmptyBatch` when either half would be empty.
    pub fn split(&self) -> EngineResult<(Batch<'a>, Batch<'a>)> {
        if self.records.len() < 2 {
            return Err(EngineError::EmptyBatch(format!(
                "cannot split batch [{}, {}) of {} record(s)",
                self.start,
                self.end(),
                self.records.len()
            )));
        }

        let mid = self.records.len().div_ceil(2);
        let (left, right) = self.records.split_at(mid);
        Ok((
            Batch::new(left, self.start),
            Batch::new(right, self.start + mid),
        ))
    }

    /// Render the batch as FASTA text (`>id` line followed by the sequence)
    pub fn to_fasta(&self) -> String {
        let mut out = String::new();
        for record in self.records {
            out.push('>');
            out.push_str(&record.id);
            out.push('\n');
            out.push_str(&record.sequence);
            out.push('\n');
        }
        out
    }
}

/// Lazy, restartable sequence of batches over a record slice
///
/// Cloning a plan restarts it from the clone's position.
#[derive(Debug, Clone)]
pub struct BatchPlan<'a> {
    records: &'a [Record],
    batch_size: usize,
    next: usize,
}

impl<'a> BatchPlan<'a> {
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Total number of batches the full plan yields
    pub fn batch_count(&self) -> usize {
        self.records.len().div_ceil(self.batch_size)
    }
}

impl<'a> Iterator for BatchPlan<'a> {
    type Item = Batch<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.records.len() {
            return None;
        }

        let start = self.next;
        let end = (start + self.batch_size).min(self.records.len());
        self.next = end;
        Some(Batch::new(&self.records[start..end], start))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.records.len() - self.next).div_ceil(self.batch_size);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for BatchPlan<'_> {}

/// Partition `records` into batches of `batch_size`
///
/// Every batch holds `batch_size` records except possibly the last.
pub fn plan(records: &[Record], batch_size: usize) -> EngineResult<BatchPlan<'_>> {
    if batch_size < 1 {
        return Err(EngineError::InvalidConfiguration(
            "batch_size must be at least 1".to_string(),
        ));
    }

    Ok(BatchPlan {
        records,
        batch_size,
        next: 0,
    })
}

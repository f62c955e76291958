//! Job windows
//!
//! Large inputs are usually submitted as several jobs, each covering a
//! contiguous slice of the records: start at a given record id and take at
//! most `job_size` records from there.

use crate::error::{EngineError, EngineResult};
use crate::types::Record;

/// Contiguous selection over the input records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobWindow {
    /// First record of the window; `None` starts at the beginning
    pub start_id: Option<String>,
    /// Maximum records in the window; `None` runs to the end
    pub job_size: Option<usize>,
}

/// Records selected by a [`JobWindow`] and their `[start, end)` offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSlice<'a> {
    pub records: &'a [Record],
    pub start: usize,
    pub end: usize,
}

impl WindowSlice<'_> {
    /// `<input>_<start>_<end>_<backend>.csv`
    pub fn output_file_name(&self, input_name: &str, backend_label: &str) -> String {
        format!("{}_{}_{}_{}.csv", input_name, self.start, self.end, backend_label)
    }
}

impl JobWindow {
    pub fn new(start_id: Option<String>, job_size: Option<usize>) -> Self {
        Self { start_id, job_size }
    }

    /// Whole input
    pub fn all() -> Self {
        Self::default()
    }

    /// Resolve the window against `records`
    ///
    /// # Errors
    /// `InvalidConfiguration` if `start_id` is not in `records` or `job_size`
    /// is zero.
    pub fn select<'a>(&self, records: &'a [Record]) -> EngineResult<WindowSlice<'a>> {
        if self.job_size == Some(0) {
            return Err(EngineError::InvalidConfiguration(
                "job_size must be at least 1".to_string(),
            ));
        }

        let start = match &self.start_id {
            None => 0,
            Some(id) => records.iter().position(|r| &r.id == id).ok_or_else(|| {
                EngineError::InvalidConfiguration(format!("start id '{}' not found in input", id))
            })?,
        };

        let end = match self.job_size {
            Some(size) => start.saturating_add(size).min(records.len()),
            None => records.len(),
        };

        Ok(WindowSlice {
            records: &records[start..end],
            start,
            end,
        })
    }
}

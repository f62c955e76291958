//! Joining predictions onto a processed dataset
//!
//! A processed dataset is a header line followed by `PepID,AMPLabel,PepSeq,PepType`
//! rows, where `AMPLabel` is the curated ground truth. Joining it with a result
//! table yields one `PepID,PepSeq,PepType,AMPLabel,PredScore,PredLabel` row per
//! dataset entry, in dataset order.

use crate::error::{EngineError, EngineResult};
use crate::io::results::ensure_table_id;
use crate::types::{Outcome, UNRESOLVED_SENTINEL};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

pub const JOINED_HEADER: &str = "PepID,PepSeq,PepType,AMPLabel,PredScore,PredLabel";

/// One curated dataset entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRow {
    pub id: String,
    /// Ground-truth label, kept as written
    pub label: String,
    pub sequence: String,
    pub pep_type: String,
}

/// A dataset entry with its prediction
#[derive(Debug, Clone, Copy)]
pub struct JoinedRow<'a> {
    pub entry: &'a DatasetRow,
    pub prediction: &'a Outcome,
}

/// Parse a processed dataset
///
/// The first line is a header and is not checked. Blank lines are skipped.
///
/// # Errors
/// `InvalidInput` for a line without exactly four fields, an empty id, or a
/// repeated id.
pub fn parse_dataset<R: Read>(reader: R) -> EngineResult<Vec<DatasetRow>> {
    let mut rows = Vec::new();
    let mut seen = HashSet::new();

    for (index, line) in BufReader::new(reader).lines().enumerate().skip(1) {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let line_no = index + 1;

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let &[id, label, sequence, pep_type] = fields.as_slice() else {
            return Err(EngineError::InvalidInput(format!(
                "line {}: expected 4 fields, found {}",
                line_no,
                fields.len()
            )));
        };
        if id.is_empty() {
            return Err(EngineError::InvalidInput(format!("line {}: empty id", line_no)));
        }
        if !seen.insert(id.to_string()) {
            return Err(EngineError::InvalidInput(format!(
                "line {}: duplicate dataset id '{}'",
                line_no, id
            )));
        }

        rows.push(DatasetRow {
            id: id.to_string(),
            label: label.to_string(),
            sequence: sequence.to_string(),
            pep_type: pep_type.to_string(),
        });
    }

    Ok(rows)
}

pub fn read_dataset(path: &Path) -> EngineResult<Vec<DatasetRow>> {
    let file = File::open(path)?;
    parse_dataset(file)
}

/// Pair every dataset entry with its prediction
///
/// When a result table repeats an id the last row wins.
///
/// # Errors
/// `InvalidInput` when a prediction names an id outside the dataset or a
/// dataset entry has no prediction.
pub fn join_predictions<'a>(
    dataset: &'a [DatasetRow],
    predictions: &'a [Outcome],
) -> EngineResult<Vec<JoinedRow<'a>>> {
    let by_id: HashMap<&str, &Outcome> =
        predictions.iter().map(|o| (o.id.as_str(), o)).collect();

    let known: HashSet<&str> = dataset.iter().map(|r| r.id.as_str()).collect();
    if let Some(stray) = predictions.iter().find(|o| !known.contains(o.id.as_str())) {
        return Err(EngineError::InvalidInput(format!(
            "prediction for '{}' has no dataset entry",
            stray.id
        )));
    }

    let mut joined = Vec::with_capacity(dataset.len());
    let mut missing = Vec::new();
    for entry in dataset {
        match by_id.get(entry.id.as_str()).copied() {
            Some(prediction) => joined.push(JoinedRow { entry, prediction }),
            None => missing.push(entry.id.as_str()),
        }
    }

    if let Some(first) = missing.first() {
        return Err(EngineError::InvalidInput(format!(
            "{} dataset ids have no prediction, first is '{}'",
            missing.len(),
            first
        )));
    }
    Ok(joined)
}

/// Write joined rows; unresolved predictions carry the sentinel in both columns
///
/// # Errors
/// `InvalidInput` when an id would split its row; nothing is written then.
pub fn write_joined<W: Write>(writer: W, rows: &[JoinedRow<'_>]) -> EngineResult<()> {
    for row in rows {
        ensure_table_id(&row.entry.id)?;
    }

    let mut out = BufWriter::new(writer);
    writeln!(out, "{}", JOINED_HEADER)?;
    for row in rows {
        let entry = row.entry;
        let prediction = row.prediction;
        write!(out, "{},{},{},{},", entry.id, entry.sequence, entry.pep_type, entry.label)?;
        match prediction.score {
            Some(score) if prediction.is_resolved() => {
                writeln!(out, "{:?},{}", score, prediction.label)?
            }
            _ => writeln!(out, "{},{}", UNRESOLVED_SENTINEL, UNRESOLVED_SENTINEL)?,
        }
    }
    out.flush()?;
    Ok(())
}

pub fn write_joined_file(path: &Path, rows: &[JoinedRow<'_>]) -> EngineResult<()> {
    write_joined(File::create(path)?, rows)?;
    tracing::debug!(path = %path.display(), rows = rows.len(), "Wrote joined dataset");
    Ok(())
}

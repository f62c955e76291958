//! Result table I/O
//!
//! The table is a header line `PepID,AMPLabel,Prob` followed by one
//! `id,label,score` line per outcome. Unresolved outcomes are written as
//! `-999,-999`; this is the only place the sentinel appears.

use crate::error::{EngineError, EngineResult};
use crate::types::{Label, Outcome, Record, UnresolvedCause, UNRESOLVED_SENTINEL};
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

pub const RESULT_HEADER: &str = "PepID,AMPLabel,Prob";

/// Reject ids that cannot be stored in a comma-separated table cell
pub(crate) fn ensure_table_id(id: &str) -> EngineResult<()> {
    if id.contains([',', '\n', '\r']) {
        return Err(EngineError::InvalidInput(format!(
            "id '{}' contains a comma or line break",
            id.escape_debug()
        )));
    }
    Ok(())
}

/// Write outcomes as a result table
///
/// # Errors
/// `InvalidInput` when an id would split its row; nothing is written then.
pub fn write_results<W: Write>(writer: W, outcomes: &[Outcome]) -> EngineResult<()> {
    for outcome in outcomes {
        ensure_table_id(&outcome.id)?;
    }

    let mut out = BufWriter::new(writer);
    writeln!(out, "{}", RESULT_HEADER)?;
    for outcome in outcomes {
        match outcome.score {
            Some(score) if outcome.is_resolved() => {
                writeln!(out, "{},{},{:?}", outcome.id, outcome.label, score)?
            }
            _ => writeln!(
                out,
                "{},{},{}",
                outcome.id, UNRESOLVED_SENTINEL, UNRESOLVED_SENTINEL
            )?,
        }
    }
    out.flush()?;
    Ok(())
}

pub fn write_results_file(path: &Path, outcomes: &[Outcome]) -> EngineResult<()> {
    write_results(File::create(path)?, outcomes)?;
    tracing::debug!(path = %path.display(), rows = outcomes.len(), "Wrote result table");
    Ok(())
}

/// Parse a result table
///
/// Unresolved rows come back with cause [`UnresolvedCause::Unknown`]. Blank
/// lines are skipped.
///
/// # Errors
/// `InvalidInput` for a missing or wrong header, a line without exactly three
/// fields, an unknown label code, or a resolved score outside `[0, 1]`.
pub fn parse_results<R: Read>(reader: R) -> EngineResult<Vec<Outcome>> {
    let mut lines = BufReader::new(reader).lines();

    let header = lines
        .next()
        .transpose()?
        .ok_or_else(|| EngineError::InvalidInput("result table is empty".to_string()))?;
    if header.trim() != RESULT_HEADER {
        return Err(EngineError::InvalidInput(format!(
            "expected header '{}', found '{}'",
            RESULT_HEADER,
            header.trim()
        )));
    }

    let mut outcomes = Vec::new();
    for (index, line) in lines.enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        // header is line 1
        let line_no = index + 2;
        outcomes.push(parse_row(line).map_err(|reason| {
            EngineError::InvalidInput(format!("line {}: {}", line_no, reason))
        })?);
    }

    Ok(outcomes)
}

fn parse_row(line: &str) -> Result<Outcome, String> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let &[id, label, score] = fields.as_slice() else {
        return Err(format!("expected 3 fields, found {}", fields.len()));
    };
    if id.is_empty() {
        return Err("empty id".to_string());
    }

    let code: i32 = label
        .parse()
        .map_err(|_| format!("label '{}' is not an integer", label))?;
    let label = Label::from_code(code).ok_or_else(|| format!("unknown label code {}", code))?;
    if !label.is_resolved() {
        return Ok(Outcome::unresolved(id, UnresolvedCause::Unknown));
    }

    let score: f64 = score
        .parse()
        .map_err(|_| format!("score '{}' is not a number", score))?;
    if !(0.0..=1.0).contains(&score) {
        return Err(format!("score {} outside [0, 1]", score));
    }
    Ok(Outcome::resolved(id, label, score))
}

pub fn read_results(path: &Path) -> EngineResult<Vec<Outcome>> {
    parse_results(File::open(path)?)
}

/// Merge several result tables into one
///
/// Ids keep the order of their first appearance. A resolved row replaces an
/// earlier unresolved row for the same id; of two resolved rows the first is
/// kept.
pub fn merge_result_tables<I>(tables: I) -> Vec<Outcome>
where
    I: IntoIterator<Item = Vec<Outcome>>,
{
    let mut merged: Vec<Outcome> = Vec::new();
    let mut position: HashMap<String, usize> = HashMap::new();

    for table in tables {
        for outcome in table {
            match position.get(&outcome.id) {
                None => {
                    position.insert(outcome.id.clone(), merged.len());
                    merged.push(outcome);
                }
                Some(&at) => {
                    let existing = &merged[at];
                    if !existing.is_resolved() && outcome.is_resolved() {
                        merged[at] = outcome;
                    } else if existing.is_resolved()
                        && outcome.is_resolved()
                        && existing != &outcome
                    {
                        tracing::warn!(
                            id = %outcome.id,
                            kept = ?existing.score,
                            ignored = ?outcome.score,
                            "Conflicting results for id, keeping first"
                        );
                    }
                }
            }
        }
    }

    merged
}

/// How completely a result table covers its input records
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoverageReport {
    pub total: usize,
    pub resolved: usize,
    /// Input ids with no row, in input order
    pub missing: Vec<String>,
    /// Input ids whose row is unresolved, in input order
    pub unresolved: Vec<String>,
    /// Row ids not present in the input
    pub unexpected: Vec<String>,
    /// Ids with more than one row
    pub duplicates: Vec<String>,
}

impl CoverageReport {
    /// Every input record has a resolved row
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.unresolved.is_empty()
    }

    /// Records needing another submission (missing or unresolved), in input order
    pub fn resubmit<'a>(&self, records: &'a [Record]) -> Vec<&'a Record> {
        let pending: HashSet<&str> = self
            .missing
            .iter()
            .chain(self.unresolved.iter())
            .map(String::as_str)
            .collect();
        records
            .iter()
            .filter(|r| pending.contains(r.id.as_str()))
            .collect()
    }
}

/// Compare `outcomes` against the `records` they should cover
pub fn coverage(records: &[Record], outcomes: &[Outcome]) -> CoverageReport {
    let mut rows: HashMap<&str, &Outcome> = HashMap::with_capacity(outcomes.len());
    let mut duplicates = Vec::new();
    for outcome in outcomes {
        match rows.entry(outcome.id.as_str()) {
            Entry::Vacant(slot) => {
                slot.insert(outcome);
            }
            Entry::Occupied(_) => {
                if !duplicates.contains(&outcome.id) {
                    duplicates.push(outcome.id.clone());
                }
            }
        }
    }

    let input_ids: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
    let mut report = CoverageReport {
        total: records.len(),
        duplicates,
        ..CoverageReport::default()
    };

    for record in records {
        match rows.get(record.id.as_str()) {
            None => report.missing.push(record.id.clone()),
            Some(outcome) if !outcome.is_resolved() => report.unresolved.push(record.id.clone()),
            Some(_) => report.resolved += 1,
        }
    }

    let mut unexpected_seen = HashSet::new();
    for outcome in outcomes {
        let id = outcome.id.as_str();
        if !input_ids.contains(id) && unexpected_seen.insert(id) {
            report.unexpected.push(outcome.id.clone());
        }
    }

    report
}

//! FASTA input
//!
//! Record id is the first whitespace-separated token of the header line; any
//! description after it is ignored. Sequences may span several lines.

use crate::error::{EngineError, EngineResult};
use crate::io::results::ensure_table_id;
use crate::types::Record;
use bio::io::fasta;
use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Parse FASTA records from any reader
///
/// # Errors
/// `InvalidInput` for sequence data before the first header, an empty id, an
/// id that cannot be written to a result table, a record without sequence, or
/// a repeated id.
pub fn parse_fasta<R: Read>(reader: R) -> EngineResult<Vec<Record>> {
    let mut records = Vec::new();
    let mut seen = HashSet::new();

    for (index, result) in fasta::Reader::new(reader).records().enumerate() {
        let entry = result
            .map_err(|e| EngineError::InvalidInput(format!("FASTA record {}: {}", index + 1, e)))?;

        let id = entry.id();
        if id.is_empty() {
            return Err(EngineError::InvalidInput(format!(
                "FASTA record {} has an empty id",
                index + 1
            )));
        }
        ensure_table_id(id)?;
        if entry.seq().is_empty() {
            return Err(EngineError::InvalidInput(format!(
                "FASTA record '{}' has no sequence",
                id
            )));
        }
        if !seen.insert(id.to_string()) {
            return Err(EngineError::InvalidInput(format!(
                "duplicate FASTA id '{}'",
                id
            )));
        }

        let sequence = String::from_utf8_lossy(entry.seq()).into_owned();
        records.push(Record::new(id, sequence));
    }

    Ok(records)
}

/// Read and parse a FASTA file
pub fn read_fasta(path: &Path) -> EngineResult<Vec<Record>> {
    let file = File::open(path)?;
    let records = parse_fasta(file)?;
    tracing::debug!(path = %path.display(), records = records.len(), "Loaded FASTA");
    Ok(records)
}

/// Write records as FASTA, one sequence line per record
pub fn write_fasta<W: Write>(writer: W, records: &[Record]) -> EngineResult<()> {
    let mut out = fasta::Writer::new(writer);
    for record in records {
        out.write(&record.id, None, record.sequence.as_bytes())?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_fasta_file(path: &Path, records: &[Record]) -> EngineResult<()> {
    write_fasta(File::create(path)?, records)
}

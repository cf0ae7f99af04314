//! Flat tab-separated form of the catalogue.
//!
//! One row per history entry, sorted by (batch key, run version). Empty
//! cells mean "absent"; tabs, newlines and backslashes inside values are
//! backslash-escaped so every row stays on one line.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use mbatch_types::{BatchKey, EntryStatus, Fingerprint, IndexEntry, RunSource, RunVersion};

use crate::catalogue::IndexCatalogue;
use crate::error::{self, StateError};

/// Header row of the tabular index.
pub const HEADER: &str = "batch_key\trun_version\tstatus\tresult_location\tcontent_fingerprint\tsample_count\tfeature_count\tlast_processed_at\tdiagnostic";

const COLUMNS: usize = 9;

/// Render the catalogue as TSV text.
#[must_use]
pub fn encode(catalogue: &IndexCatalogue) -> String {
    let mut out = String::with_capacity(HEADER.len() + 1 + catalogue.len() * 160);
    out.push_str(HEADER);
    out.push('\n');
    for entry in catalogue.all_entries() {
        let location = entry
            .result_location
            .as_deref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let count = |n: Option<usize>| n.map(|n| n.to_string()).unwrap_or_default();
        let _ = writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            escape(entry.batch_key.as_str()),
            escape(entry.run_version.as_str()),
            entry.status.as_str(),
            escape(&location),
            escape(entry.content_fingerprint.as_str()),
            count(entry.sample_count),
            count(entry.feature_count),
            escape(&entry.last_processed_at),
            escape(entry.diagnostic.as_deref().unwrap_or_default()),
        );
    }
    out
}

/// Parse TSV text read from `origin` into a catalogue for `run_source`.
///
/// # Errors
///
/// Returns [`StateError::Corrupt`] on a wrong header, a short or long row,
/// an unknown status, a non-numeric count, a bad escape, or a duplicate (key, version) pair.
pub fn decode(text: &str, run_source: RunSource, origin: &Path) -> error::Result<IndexCatalogue> {
    let mut lines = text.lines();
    match lines.next() {
        Some(header) if header == HEADER => {}
        Some(other) => {
            return Err(StateError::corrupt(
                origin,
                format!("unexpected header '{other}'"),
            ))
        }
        None => return Err(StateError::corrupt(origin, "empty tabular index")),
    }

    let mut entries = Vec::new();
    for (idx, line) in lines.enumerate() {
        let line_no = idx + 2;
        if line.is_empty() {
            continue;
        }
        entries.push(decode_row(line).map_err(|reason| {
            StateError::corrupt(origin, format!("line {line_no}: {reason}"))
        })?);
    }
    IndexCatalogue::from_entries(run_source, entries, origin)
}

fn decode_row(line: &str) -> Result<IndexEntry, String> {
    let cells: Vec<&str> = line.split('\t').collect();
    if cells.len() != COLUMNS {
        return Err(format!("expected {COLUMNS} columns, found {}", cells.len()));
    }
    let cells = cells
        .into_iter()
        .map(unescape)
        .collect::<Result<Vec<_>, _>>()?;

    let status = EntryStatus::parse(&cells[2]).ok_or_else(|| format!("unknown status '{}'", cells[2]))?;
    if cells[0].is_empty() {
        return Err("empty batch_key".into());
    }
    if cells[1].is_empty() {
        return Err("empty run_version".into());
    }

    Ok(IndexEntry {
        batch_key: BatchKey::new(cells[0].clone()),
        run_version: RunVersion::new(cells[1].clone()),
        status,
        result_location: non_empty(&cells[3]).map(PathBuf::from),
        content_fingerprint: Fingerprint::new(cells[4].clone()),
        sample_count: parse_count("sample_count", &cells[5])?,
        feature_count: parse_count("feature_count", &cells[6])?,
        last_processed_at: cells[7].clone(),
        diagnostic: non_empty(&cells[8]).map(str::to_string),
    })
}

fn parse_count(column: &str, cell: &str) -> Result<Option<usize>, String> {
    non_empty(cell)
        .map(|n| n.parse().map_err(|_| format!("invalid {column} '{n}'")))
        .transpose()
}

fn non_empty(cell: &str) -> Option<&str> {
    (!cell.is_empty()).then_some(cell)
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(value: &str) -> Result<String, String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => return Err(format!("invalid escape '\\{other}'")),
            None => return Err("dangling escape".into()),
        }
    }
    Ok(out)
}

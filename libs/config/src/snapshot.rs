//! # Pointer Snapshot Parser
//!
//! The snapshot is a newline-delimited text file of `scope::key::value`
//! records:
//!
//! ```text
//! Current::eventYear::2026
//! Current::artistUrl::https://festival.example.com/2026/artists.csv
//! Default::reportUrl-en::https://festival.example.com/report
//! 2025::artistUrl::https://festival.example.com/2025/artists.csv
//! ```
//!
//! Lines are split on the first two delimiters only, so a value may itself
//! contain `::`. Lines with fewer than three fields are skipped and counted.
//! Blank lines and `#` comments are ignored.

use crate::error::ResolveError;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, warn};
use types::Scope;

/// Field delimiter
pub const DELIMITER: &str = "::";

/// One `scope::key::value` record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub scope: Scope,
    pub key: String,
    pub value: String,
}

/// Result of parsing a whole snapshot
#[derive(Debug, Clone, Default)]
pub struct ParsedSnapshot {
    pub records: Vec<SnapshotRecord>,
    /// Malformed lines that were skipped
    pub skipped: usize,
}

impl ParsedSnapshot {
    /// Value for `(scope, key)`; the last record wins when duplicated
    pub fn value(&self, scope: &Scope, key: &str) -> Option<&str> {
        self.records
            .iter()
            .rev()
            .find(|r| &r.scope == scope && r.key == key)
            .map(|r| r.value.as_str())
    }
}

/// Parse one line. `Ok(None)` for blank and comment lines.
pub fn parse_line(line_number: usize, line: &str) -> Result<Option<SnapshotRecord>, ResolveError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let mut fields = trimmed.splitn(3, DELIMITER);
    let (scope, key, value) = match (fields.next(), fields.next(), fields.next()) {
        (Some(scope), Some(key), Some(value)) => (scope.trim(), key.trim(), value.trim()),
        _ => {
            return Err(ResolveError::Parse {
                line: line_number,
                reason: format!("expected 3 '{}'-separated fields", DELIMITER),
            })
        }
    };

    if scope.is_empty() || key.is_empty() {
        return Err(ResolveError::Parse {
            line: line_number,
            reason: "empty scope or key".to_string(),
        });
    }

    Ok(Some(SnapshotRecord {
        scope: Scope::parse(scope),
        key: key.to_string(),
        value: value.to_string(),
    }))
}

/// Parse snapshot text, keeping only records accepted by `keep`
pub fn parse_snapshot<F>(text: &str, mut keep: F) -> ParsedSnapshot
where
    F: FnMut(&Scope, &str) -> bool,
{
    let mut parsed = ParsedSnapshot::default();

    for (index, line) in text.lines().enumerate() {
        match parse_line(index + 1, line) {
            Ok(Some(record)) => {
                if keep(&record.scope, &record.key) {
                    parsed.records.push(record);
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Skipping snapshot line: {}", e);
                parsed.skipped += 1;
            }
        }
    }

    parsed
}

/// Read and parse the snapshot file.
///
/// A missing file yields [`ResolveError::MissingSnapshot`], which callers
/// treat as the normal pre-first-download state.
pub fn read_snapshot<F>(path: &Path, keep: F) -> Result<ParsedSnapshot, ResolveError>
where
    F: FnMut(&Scope, &str) -> bool,
{
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ResolveError::MissingSnapshot {
                path: path.to_path_buf(),
            })
        }
        Err(e) => return Err(e.into()),
    };

    let text = String::from_utf8_lossy(&bytes);
    let parsed = parse_snapshot(&text, keep);
    debug!(
        path = ?path,
        records = parsed.records.len(),
        skipped = parsed.skipped,
        "Parsed pointer snapshot"
    );
    Ok(parsed)
}

use std::path::{Path, PathBuf};

use crate::records::{ProcessedRecord, TimeError, TimeWindow};

/// How close a record's timestamp must be to a window endpoint, in seconds,
/// for the record to anchor that endpoint.
pub const ENDPOINT_TOLERANCE_SECS: i64 = 18;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("failed to read archive {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("archive line {line} is not a valid record: {source}")]
    Decode {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("archive record {index} has an unreadable timestamp: {source}")]
    Time {
        index: usize,
        #[source]
        source: TimeError,
    },
}

impl ArchiveError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ArchiveError::Io { source, .. }
            if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Reads every record from a line-delimited archive, oldest first.
///
/// Blank lines are skipped. Any undecodable line fails the whole read; the
/// archive is append-only and a bad line means it has been corrupted.
pub async fn read_archive(path: impl AsRef<Path>) -> Result<Vec<ProcessedRecord>, ArchiveError> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ArchiveError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    let mut records = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(line).map_err(|source| ArchiveError::Decode {
            line: idx + 1,
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Selects the sub-slice of `records` bracketed by the window endpoints.
///
/// Each endpoint anchors to the last record whose timestamp lies within
/// [`ENDPOINT_TOLERANCE_SECS`] of it; an endpoint with no nearby record
/// falls back to the corresponding extreme of the archive. The result is the
/// inclusive range between the two anchors, empty when they cross.
pub fn window_slice(
    records: &[ProcessedRecord],
    window: TimeWindow,
) -> Result<&[ProcessedRecord], ArchiveError> {
    if records.is_empty() {
        return Ok(&[]);
    }

    let mut start = 0;
    let mut end = records.len() - 1;
    for (idx, record) in records.iter().enumerate() {
        let ts = record
            .epoch_seconds()
            .map_err(|source| ArchiveError::Time { index: idx, source })?;
        if (ts - window.from).abs() < ENDPOINT_TOLERANCE_SECS {
            start = idx;
        }
        if (ts - window.to).abs() < ENDPOINT_TOLERANCE_SECS {
            end = idx;
        }
    }

    if start > end {
        return Ok(&[]);
    }
    Ok(&records[start..=end])
}

//! Shared pieces of file scanning: errors, outcomes, dates and fingerprints.

use crate::config::ConfigError;
use crate::headers::HeaderError;
use crate::models::{EntryRecord, FileFingerprint, UnknownVariant};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use std::path::Path;
use std::time::UNIX_EPOCH;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error("{path}: {source}")]
    InvalidValue {
        path: String,
        #[source]
        source: UnknownVariant,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{path}: invalid Entry-ID {value:?}")]
    InvalidId { path: String, value: String },

    #[error("{path}: unrecognized date {value:?}")]
    InvalidDate { path: String, value: String },

    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ScanError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        ScanError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Result of scanning one entry file
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    Indexed(EntryRecord),
    /// The file needs its headers rewritten; rescan with fixups enabled
    NeedsFixup,
}

/// The category a file belongs to, from its path relative to the content root
///
/// ```
/// use publ_core::scan::category_from_relpath;
///
/// assert_eq!(category_from_relpath("blog/2020/post.md"), "blog/2020");
/// assert_eq!(category_from_relpath("about.md"), "");
/// ```
pub fn category_from_relpath(relpath: &str) -> String {
    let normalized = relpath.replace('\\', "/");
    match normalized.rsplit_once('/') {
        Some((dir, _)) => dir.trim_matches('/').to_string(),
        None => String::new(),
    }
}

const NAIVE_DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"];

/// Parse a `Date` header; values without an offset are taken in `tz`
pub fn parse_date(value: &str, tz: &FixedOffset) -> Option<DateTime<FixedOffset>> {
    let value = value.trim();

    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Some(date);
    }
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date);
    }
    if let Ok(date) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%:z") {
        return Some(date);
    }
    if let Ok(date) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S %z") {
        return Some(date);
    }

    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return tz.from_local_datetime(&naive).single();
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .and_then(|naive| tz.from_local_datetime(&naive).single())
}

/// Format a date the way it is written back into a `Date` header
pub fn format_date(date: &DateTime<FixedOffset>) -> String {
    date.format("%Y-%m-%d %H:%M:%S%:z").to_string()
}

/// A file's modification time in `tz`
pub fn file_mtime(path: &Path, tz: &FixedOffset) -> Result<DateTime<FixedOffset>, ScanError> {
    let modified = std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|e| ScanError::io(path, e))?;
    let utc: DateTime<chrono::Utc> = modified.into();
    // Whole seconds, matching what gets written to the Date header
    let utc = chrono::Timelike::with_nanosecond(&utc, 0).unwrap_or(utc);
    Ok(utc.with_timezone(tz))
}

/// Compute the content fingerprint of a file
pub fn file_fingerprint(path: &Path) -> Result<FileFingerprint, ScanError> {
    let data = std::fs::read(path).map_err(|e| ScanError::io(path, e))?;
    let mtime = std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|e| ScanError::io(path, e))?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    Ok(FileFingerprint {
        file_path: path.display().to_string(),
        fingerprint: blake3::hash(&data).to_hex().to_string(),
        file_mtime: mtime,
    })
}

//! JSON shapes printed by the `--json` commands.

use chrono::{DateTime, FixedOffset, SecondsFormat};
use publ_core::{ContentIndex, EntryRecord, Redirect};
use serde::Serialize;

pub const SCHEMA_VERSION: &str = "publ-cli/1";

/// Standard envelope for machine-consumable output.
#[derive(Serialize)]
pub struct Envelope<T> {
    pub schema_version: &'static str,
    pub kind: &'static str,
    pub data: T,
}

pub fn envelope<T>(kind: &'static str, data: T) -> Envelope<T> {
    Envelope {
        schema_version: SCHEMA_VERSION,
        kind,
        data,
    }
}

#[derive(Serialize)]
pub struct ScanSummary {
    pub queued: usize,
    pub scanned: usize,
    pub entries: usize,
    pub categories: usize,
    pub aliases: usize,
    pub generation: u64,
}

impl ScanSummary {
    pub fn new(index: &ContentIndex, queued: usize, scanned: usize) -> Self {
        Self {
            queued,
            scanned,
            entries: index.entry_count(),
            categories: index.subcategory_paths("").len(),
            aliases: index.all_aliases().len(),
            generation: index.generation(),
        }
    }
}

#[derive(Serialize)]
pub struct EntrySummary {
    pub id: i64,
    pub title: String,
    pub category: String,
    pub status: &'static str,
    #[serde(rename = "type")]
    pub entry_type: &'static str,
    pub date: String,
    pub permalink: String,
}

impl From<&EntryRecord> for EntrySummary {
    fn from(record: &EntryRecord) -> Self {
        Self {
            id: record.id,
            title: record.title.clone(),
            category: record.category.clone(),
            status: record.status.as_str(),
            entry_type: record.entry_type.as_str(),
            date: isoformat(record.entry_date),
            permalink: record.permalink(),
        }
    }
}

#[derive(Serialize)]
pub struct EntryData {
    #[serde(flatten)]
    pub summary: EntrySummary,
    pub file_path: String,
    pub uuid: Option<String>,
    pub redirect_url: Option<String>,
    pub headers: Vec<(String, String)>,
}

#[derive(Serialize)]
pub struct CategoryData {
    pub path: String,
    pub name: String,
    pub sort_name: String,
    pub subcats: Vec<String>,
    pub entries: Vec<EntrySummary>,
}

#[derive(Serialize)]
pub struct AliasData {
    pub path: String,
    pub url: Option<String>,
    pub status: Option<u16>,
}

impl AliasData {
    pub fn new(path: &str, redirect: Option<Redirect>) -> Self {
        Self {
            path: path.to_string(),
            status: redirect.as_ref().map(Redirect::status_code),
            url: redirect.map(|r| r.url),
        }
    }
}

pub fn isoformat(date: DateTime<FixedOffset>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, false)
}

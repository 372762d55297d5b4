//! Index record types for entries, categories, aliases and fingerprints.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Publication state of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum PublishStatus {
    /// Not reachable at all
    Draft,
    /// Reachable by direct link, omitted from listings
    Hidden,
    Published,
    /// Published once its date has passed
    #[default]
    Scheduled,
    /// Removed; requests get 410 Gone
    Gone,
}

impl PublishStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishStatus::Draft => "DRAFT",
            PublishStatus::Hidden => "HIDDEN",
            PublishStatus::Published => "PUBLISHED",
            PublishStatus::Scheduled => "SCHEDULED",
            PublishStatus::Gone => "GONE",
        }
    }
}

impl FromStr for PublishStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DRAFT" => Ok(PublishStatus::Draft),
            "HIDDEN" => Ok(PublishStatus::Hidden),
            "PUBLISHED" => Ok(PublishStatus::Published),
            "SCHEDULED" => Ok(PublishStatus::Scheduled),
            "GONE" => Ok(PublishStatus::Gone),
            _ => Err(UnknownVariant {
                kind: "status",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for PublishStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of entry; pages are excluded from feeds and navigation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryType {
    #[default]
    Entry,
    Page,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Entry => "ENTRY",
            EntryType::Page => "PAGE",
        }
    }
}

impl FromStr for EntryType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ENTRY" => Ok(EntryType::Entry),
            "PAGE" => Ok(EntryType::Page),
            _ => Err(UnknownVariant {
                kind: "entry type",
                value: s.to_string(),
            }),
        }
    }
}

/// Indexed metadata for a single entry file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub id: i64,
    pub file_path: String,
    pub category: String,
    pub status: PublishStatus,
    pub entry_type: EntryType,
    pub slug_text: String,
    pub redirect_url: Option<String>,
    pub title: String,
    pub entry_date: DateTime<FixedOffset>,
    #[serde(default)]
    pub uuid: Option<String>,
}

impl EntryRecord {
    /// Whether the entry shows up in listings and navigation as of `now`
    pub fn is_visible(&self, now: DateTime<FixedOffset>) -> bool {
        match self.status {
            PublishStatus::Published => true,
            PublishStatus::Scheduled => self.entry_date <= now,
            _ => false,
        }
    }

    /// Whether the entry can be fetched by direct link as of `now`
    pub fn is_reachable(&self, now: DateTime<FixedOffset>) -> bool {
        match self.status {
            PublishStatus::Published | PublishStatus::Hidden => true,
            PublishStatus::Scheduled => self.entry_date <= now,
            PublishStatus::Draft | PublishStatus::Gone => false,
        }
    }

    /// Canonical URL path for the entry
    pub fn permalink(&self) -> String {
        if self.category.is_empty() {
            format!("/{}-{}", self.id, self.slug_text)
        } else {
            format!("/{}/{}-{}", self.category, self.id, self.slug_text)
        }
    }

    /// Sort key used for chronological ordering
    pub fn sort_key(&self) -> (DateTime<FixedOffset>, i64) {
        (self.entry_date, self.id)
    }
}

/// Metadata for a category, from its `.cat`/`.meta` file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRecord {
    pub category: String,
    pub file_path: String,
    pub name: Option<String>,
    pub sort_name: Option<String>,
}

/// A URL path that redirects somewhere else
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PathAliasRecord {
    pub path: String,
    pub entry: Option<i64>,
    pub category: Option<String>,
    pub url: Option<String>,
    pub template: Option<String>,
    /// File that declared the alias, for pruning
    #[serde(default)]
    pub source_file: Option<String>,
}

/// Last-seen fingerprint of a content file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFingerprint {
    pub file_path: String,
    pub fingerprint: String,
    /// Modification time, seconds since the epoch
    pub file_mtime: i64,
}

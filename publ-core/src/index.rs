//! In-memory content index.
//!
//! Holds the record tables built by scanning the content directory. The
//! index is shared between the indexer and request handlers, so every table
//! sits behind one `RwLock`.

use crate::models::{CategoryRecord, EntryRecord, EntryType, FileFingerprint, PathAliasRecord};
use chrono::{DateTime, FixedOffset};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

const INDEX_VERSION: &str = "1";

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize index: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Tables {
    entries: BTreeMap<i64, EntryRecord>,
    #[serde(skip)]
    entry_by_path: HashMap<String, i64>,
    categories: BTreeMap<String, CategoryRecord>,
    aliases: BTreeMap<String, PathAliasRecord>,
    fingerprints: BTreeMap<String, FileFingerprint>,
}

impl Tables {
    fn rebuild_path_lookup(&mut self) {
        self.entry_by_path = self
            .entries
            .values()
            .map(|e| (e.file_path.clone(), e.id))
            .collect();
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    version: String,
    tables: Tables,
}

/// Shared store of every indexed record
#[derive(Debug, Default)]
pub struct ContentIndex {
    tables: RwLock<Tables>,
    generation: AtomicU64,
}

impl ContentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter bumped whenever indexed content changes; used to invalidate caches
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    // ---- entries ----

    pub fn entry(&self, id: i64) -> Option<EntryRecord> {
        self.tables.read().entries.get(&id).cloned()
    }

    pub fn entry_by_path(&self, file_path: &str) -> Option<EntryRecord> {
        let tables = self.tables.read();
        tables
            .entry_by_path
            .get(file_path)
            .and_then(|id| tables.entries.get(id))
            .cloned()
    }

    /// Next unused entry id
    pub fn next_entry_id(&self) -> i64 {
        self.tables
            .read()
            .entries
            .keys()
            .next_back()
            .map(|id| id + 1)
            .unwrap_or(1)
    }

    /// Insert or replace an entry record, keyed by id
    ///
    /// Any other record that claimed the same file is dropped.
    pub fn upsert_entry(&self, record: EntryRecord) {
        let mut tables = self.tables.write();

        if let Some(previous_id) = tables.entry_by_path.get(&record.file_path).copied() {
            if previous_id != record.id {
                tables.entries.remove(&previous_id);
            }
        }
        let stale = tables
            .entries
            .get(&record.id)
            .filter(|previous| previous.file_path != record.file_path)
            .map(|previous| previous.file_path.clone());
        if let Some(stale) = stale {
            tables.entry_by_path.remove(&stale);
        }

        tables.entry_by_path.insert(record.file_path.clone(), record.id);
        tables.entries.insert(record.id, record);
    }

    /// Remove the entry indexed from `file_path`, along with its aliases
    pub fn remove_entry_by_path(&self, file_path: &str) -> Option<EntryRecord> {
        let mut tables = self.tables.write();
        let id = tables.entry_by_path.remove(file_path)?;
        tables.aliases.retain(|_, a| a.entry != Some(id));
        tables.entries.remove(&id)
    }

    pub fn entry_count(&self) -> usize {
        self.tables.read().entries.len()
    }

    pub fn all_entries(&self) -> Vec<EntryRecord> {
        self.tables.read().entries.values().cloned().collect()
    }

    /// Entries in a category (and optionally its descendants), oldest first
    pub fn entries_in_category(&self, category: &str, recurse: bool) -> Vec<EntryRecord> {
        let tables = self.tables.read();
        let mut found: Vec<EntryRecord> = tables
            .entries
            .values()
            .filter(|e| {
                e.category == category || (recurse && is_descendant(&e.category, category))
            })
            .cloned()
            .collect();
        found.sort_by_key(|e| e.sort_key());
        found
    }

    /// The visible entry immediately before `entry` in its category
    pub fn previous(&self, entry: &EntryRecord, now: DateTime<FixedOffset>) -> Option<EntryRecord> {
        self.navigable(&entry.category, now)
            .into_iter()
            .filter(|e| e.sort_key() < entry.sort_key())
            .next_back()
    }

    /// The visible entry immediately after `entry` in its category
    pub fn next(&self, entry: &EntryRecord, now: DateTime<FixedOffset>) -> Option<EntryRecord> {
        self.navigable(&entry.category, now)
            .into_iter()
            .find(|e| e.sort_key() > entry.sort_key())
    }

    fn navigable(&self, category: &str, now: DateTime<FixedOffset>) -> Vec<EntryRecord> {
        self.entries_in_category(category, false)
            .into_iter()
            .filter(|e| e.entry_type == EntryType::Entry && e.is_visible(now))
            .collect()
    }

    // ---- categories ----

    pub fn category(&self, path: &str) -> Option<CategoryRecord> {
        self.tables.read().categories.get(path).cloned()
    }

    pub fn upsert_category(&self, record: CategoryRecord) {
        let mut tables = self.tables.write();
        tables
            .categories
            .retain(|_, c| c.file_path != record.file_path || c.category == record.category);
        tables.categories.insert(record.category.clone(), record);
    }

    pub fn remove_category_by_path(&self, file_path: &str) -> Option<CategoryRecord> {
        let mut tables = self.tables.write();
        let key = tables
            .categories
            .iter()
            .find(|(_, c)| c.file_path == file_path)
            .map(|(k, _)| k.clone())?;
        tables
            .aliases
            .retain(|_, a| a.source_file.as_deref() != Some(file_path));
        tables.categories.remove(&key)
    }

    /// Every distinct category strictly below `path`, sorted
    ///
    /// A category exists if an entry or a category meta file names it.
    pub fn subcategory_paths(&self, path: &str) -> Vec<String> {
        let tables = self.tables.read();
        let known = tables
            .entries
            .values()
            .map(|e| e.category.as_str())
            .chain(tables.categories.keys().map(|c| c.as_str()));

        known
            .filter(|c| is_descendant(c, path))
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Whether any entry or meta file names this category or one below it
    pub fn category_exists(&self, path: &str) -> bool {
        if path.is_empty() {
            return true;
        }
        let tables = self.tables.read();
        tables.categories.contains_key(path)
            || tables
                .entries
                .values()
                .any(|e| e.category == path || is_descendant(&e.category, path))
    }

    // ---- path aliases ----

    pub fn alias(&self, path: &str) -> Option<PathAliasRecord> {
        self.tables.read().aliases.get(path).cloned()
    }

    pub fn upsert_alias(&self, record: PathAliasRecord) {
        self.tables
            .write()
            .aliases
            .insert(record.path.clone(), record);
    }

    pub fn remove_alias(&self, path: &str) -> Option<PathAliasRecord> {
        self.tables.write().aliases.remove(path)
    }

    /// Drop every alias declared by `source_file`
    pub fn remove_aliases_from(&self, source_file: &str) {
        self.tables
            .write()
            .aliases
            .retain(|_, a| a.source_file.as_deref() != Some(source_file));
    }

    pub fn all_aliases(&self) -> Vec<PathAliasRecord> {
        self.tables.read().aliases.values().cloned().collect()
    }

    // ---- fingerprints ----

    pub fn fingerprint(&self, file_path: &str) -> Option<FileFingerprint> {
        self.tables.read().fingerprints.get(file_path).cloned()
    }

    pub fn set_fingerprint(&self, record: FileFingerprint) {
        self.tables
            .write()
            .fingerprints
            .insert(record.file_path.clone(), record);
    }

    pub fn remove_fingerprint(&self, file_path: &str) {
        self.tables.write().fingerprints.remove(file_path);
    }

    /// The most recently modified fingerprinted file, for cache busting
    pub fn last_modified(&self) -> Option<FileFingerprint> {
        self.tables
            .read()
            .fingerprints
            .values()
            .max_by_key(|f| f.file_mtime)
            .cloned()
    }

    // ---- maintenance ----

    /// Drop records whose source files no longer exist
    ///
    /// Returns the paths that were pruned.
    pub fn prune_missing(&self) -> Vec<String> {
        let missing: Vec<String> = {
            let tables = self.tables.read();
            let paths = tables
                .entries
                .values()
                .map(|e| e.file_path.as_str())
                .chain(tables.categories.values().map(|c| c.file_path.as_str()))
                .chain(tables.fingerprints.keys().map(|p| p.as_str()));
            paths
                .filter(|p| !Path::new(p).is_file())
                .map(str::to_string)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        };

        for path in &missing {
            tracing::info!("File disappeared: {}", path);
            self.remove_entry_by_path(path);
            self.remove_category_by_path(path);
            self.remove_fingerprint(path);
        }

        if !missing.is_empty() {
            self.bump_generation();
        }
        missing
    }

    /// Persist every table as versioned JSON
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let payload = PersistedIndex {
            version: INDEX_VERSION.to_string(),
            tables: self.tables.read().clone(),
        };
        let json = serde_json::to_vec(&payload)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| IndexError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        fs::write(path, json).map_err(|source| IndexError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Load a persisted index, or start empty if it is missing or incompatible
    pub fn load(path: &Path) -> Self {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(_) => return Self::new(),
        };

        match serde_json::from_slice::<PersistedIndex>(&data) {
            Ok(persisted) if persisted.version == INDEX_VERSION => {
                let mut tables = persisted.tables;
                tables.rebuild_path_lookup();
                tracing::debug!("Loaded {} indexed entries from {:?}", tables.entries.len(), path);
                Self {
                    tables: RwLock::new(tables),
                    generation: AtomicU64::new(0),
                }
            }
            Ok(_) => {
                tracing::warn!("Ignoring index cache with a different version: {:?}", path);
                Self::new()
            }
            Err(err) => {
                tracing::warn!("Failed to parse index cache {:?}: {}", path, err);
                Self::new()
            }
        }
    }
}

/// Whether `child` is strictly below `parent` in the category tree
pub fn is_descendant(child: &str, parent: &str) -> bool {
    if parent.is_empty() {
        !child.is_empty()
    } else {
        child
            .strip_prefix(parent)
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PublishStatus;
    use chrono::TimeZone;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn entry(id: i64, category: &str, day: u32, status: PublishStatus) -> EntryRecord {
        EntryRecord {
            id,
            file_path: format!("/nonexistent/{}/{}.md", category, id),
            category: category.to_string(),
            status,
            entry_type: EntryType::Entry,
            slug_text: format!("entry-{}", id),
            redirect_url: None,
            title: format!("Entry {}", id),
            entry_date: utc().with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap(),
            uuid: None,
        }
    }

    fn now() -> DateTime<FixedOffset> {
        utc().with_ymd_and_hms(2024, 1, 20, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_next_entry_id() {
        let index = ContentIndex::new();
        assert_eq!(index.next_entry_id(), 1);
        index.upsert_entry(entry(41, "blog", 1, PublishStatus::Published));
        assert_eq!(index.next_entry_id(), 42);
    }

    #[test]
    fn test_upsert_moves_file_between_ids() {
        let index = ContentIndex::new();
        let first = entry(1, "blog", 1, PublishStatus::Published);
        index.upsert_entry(first.clone());

        let mut renumbered = first.clone();
        renumbered.id = 5;
        index.upsert_entry(renumbered);

        assert!(index.entry(1).is_none());
        assert_eq!(index.entry_by_path(&first.file_path).unwrap().id, 5);
        assert_eq!(index.entry_count(), 1);
    }

    #[test]
    fn test_previous_next_skip_invisible() {
        let index = ContentIndex::new();
        index.upsert_entry(entry(1, "blog", 1, PublishStatus::Published));
        index.upsert_entry(entry(2, "blog", 2, PublishStatus::Draft));
        index.upsert_entry(entry(3, "blog", 3, PublishStatus::Published));
        index.upsert_entry(entry(4, "blog", 25, PublishStatus::Scheduled));
        index.upsert_entry(entry(5, "other", 4, PublishStatus::Published));

        let middle = index.entry(3).unwrap();
        assert_eq!(index.previous(&middle, now()).map(|e| e.id), Some(1));
        assert_eq!(index.next(&middle, now()).map(|e| e.id), None);

        let first = index.entry(1).unwrap();
        assert_eq!(index.previous(&first, now()), None);
        assert_eq!(index.next(&first, now()).map(|e| e.id), Some(3));
    }

    #[test]
    fn test_same_date_orders_by_id() {
        let index = ContentIndex::new();
        index.upsert_entry(entry(10, "blog", 5, PublishStatus::Published));
        index.upsert_entry(entry(11, "blog", 5, PublishStatus::Published));

        let a = index.entry(10).unwrap();
        assert_eq!(index.next(&a, now()).map(|e| e.id), Some(11));
    }

    #[test]
    fn test_subcategory_paths() {
        let index = ContentIndex::new();
        index.upsert_entry(entry(1, "", 1, PublishStatus::Published));
        index.upsert_entry(entry(2, "blog", 1, PublishStatus::Published));
        index.upsert_entry(entry(3, "blog/travel", 1, PublishStatus::Published));
        index.upsert_entry(entry(4, "blogroll", 1, PublishStatus::Published));

        assert_eq!(
            index.subcategory_paths(""),
            vec!["blog", "blog/travel", "blogroll"]
        );
        assert_eq!(index.subcategory_paths("blog"), vec!["blog/travel"]);
        assert!(index.category_exists("blog"));
        assert!(!index.category_exists("nope"));
    }

    #[test]
    fn test_prune_missing_removes_entries_and_aliases() {
        let index = ContentIndex::new();
        let gone = entry(1, "blog", 1, PublishStatus::Published);
        index.upsert_entry(gone.clone());
        index.upsert_alias(PathAliasRecord {
            path: "/old".into(),
            entry: Some(1),
            ..Default::default()
        });

        let pruned = index.prune_missing();
        assert_eq!(pruned, vec![gone.file_path]);
        assert!(index.entry(1).is_none());
        assert!(index.alias("/old").is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");

        let index = ContentIndex::new();
        let rec = entry(3, "blog", 2, PublishStatus::Published);
        index.upsert_entry(rec.clone());
        index.save(&path).unwrap();

        let loaded = ContentIndex::load(&path);
        assert_eq!(loaded.entry_by_path(&rec.file_path), Some(rec));
    }

    #[test]
    fn test_load_rejects_other_versions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        fs::write(&path, r#"{"version":"0","tables":{"entries":{},"categories":{},"aliases":{},"fingerprints":{}}}"#).unwrap();
        assert_eq!(ContentIndex::load(&path).entry_count(), 0);
    }

    #[test]
    fn test_is_descendant() {
        assert!(is_descendant("a/b", "a"));
        assert!(!is_descendant("ab", "a"));
        assert!(!is_descendant("a", "a"));
        assert!(is_descendant("a", ""));
        assert!(!is_descendant("", ""));
    }
}

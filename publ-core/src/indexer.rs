//! Content indexer: batches filesystem changes and scans them into the index.
//!
//! Files are queued into a pending set. A single tokio task waits for
//! activity to settle, then drains the set on the blocking pool, repeating
//! until nothing new arrived during the last batch.

use crate::category;
use crate::config::Config;
use crate::entry;
use crate::index::ContentIndex;
use crate::scan::{file_fingerprint, ScanOutcome};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use walkdir::WalkDir;

/// File extensions indexed as entries
pub const ENTRY_TYPES: &[&str] = &["md", "htm", "html"];

/// File extensions indexed as category metadata
pub const CATEGORY_TYPES: &[&str] = &["cat", "meta"];

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

/// Whether a file is something the indexer cares about
pub fn is_scannable(path: &Path) -> bool {
    extension(path).is_some_and(|ext| {
        ENTRY_TYPES.contains(&ext.as_str()) || CATEGORY_TYPES.contains(&ext.as_str())
    })
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct QueueItem {
    fullpath: PathBuf,
    relpath: String,
    fixups: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: BTreeSet<QueueItem>,
    running: bool,
}

/// What happened to one scanned file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileResult {
    Scanned,
    Failed,
    Removed,
    Ignored,
}

pub struct Indexer {
    index: Arc<ContentIndex>,
    config: Arc<Config>,
    wait_time: Duration,
    state: Mutex<QueueState>,
}

impl Indexer {
    pub fn new(index: Arc<ContentIndex>, config: Arc<Config>) -> Arc<Self> {
        let wait_time = Duration::from_secs_f64(config.index_wait_time.max(0.0));
        Arc::new(Self {
            index,
            config,
            wait_time,
            state: Mutex::new(QueueState::default()),
        })
    }

    pub fn index(&self) -> &Arc<ContentIndex> {
        &self.index
    }

    /// Number of files waiting to be scanned
    pub fn queue_length(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Whether a batch is running or queued
    pub fn in_progress(&self) -> bool {
        let state = self.state.lock();
        state.running || !state.pending.is_empty()
    }

    fn enqueue(&self, fullpath: &Path, relpath: &str, fixups: bool) {
        self.state.lock().pending.insert(QueueItem {
            fullpath: fullpath.to_path_buf(),
            relpath: relpath.to_string(),
            fixups,
        });
    }

    /// Queue a file and make sure a worker will pick it up
    ///
    /// Must be called from within a tokio runtime.
    pub fn scan_file(self: &Arc<Self>, fullpath: &Path, relpath: &str, fixups: bool) {
        self.enqueue(fullpath, relpath, fixups);
        self.schedule();
    }

    fn schedule(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.running {
                return;
            }
            state.running = true;
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tracing::debug!("Indexer worker started");
            tokio::time::sleep(this.wait_time).await;

            loop {
                let worker = Arc::clone(&this);
                if let Err(err) = tokio::task::spawn_blocking(move || worker.scan_pending()).await {
                    tracing::error!("Indexer batch failed: {}", err);
                }

                // Catch anything that arrived while the batch ran
                let mut state = this.state.lock();
                if state.pending.is_empty() {
                    state.running = false;
                    break;
                }
            }
            tracing::debug!("Indexer worker idle");
        });
    }

    /// Scan one batch of pending files; returns how many were processed
    pub fn scan_pending(&self) -> usize {
        let items = std::mem::take(&mut self.state.lock().pending);
        if items.is_empty() {
            return 0;
        }
        tracing::debug!("Processing {} files", items.len());

        for item in &items {
            self.scan_item(item);
        }

        self.index.bump_generation();
        self.persist();
        items.len()
    }

    /// Process pending files until the queue is empty, including fixup retries
    pub fn process_all(&self) -> usize {
        let mut total = 0;
        loop {
            let scanned = self.scan_pending();
            if scanned == 0 {
                return total;
            }
            total += scanned;
        }
    }

    fn persist(&self) {
        if let Some(path) = self.config.cache_path() {
            if let Err(err) = self.index.save(&path) {
                tracing::warn!("Failed to save index cache: {}", err);
            }
        }
    }

    fn scan_item(&self, item: &QueueItem) -> FileResult {
        let QueueItem {
            fullpath,
            relpath,
            fixups,
        } = item;
        tracing::debug!("Scanning file: {:?} ({}) fixups={}", fullpath, relpath, fixups);

        let file_path = fullpath.display().to_string();
        if !fullpath.is_file() {
            tracing::info!("File removed: {}", file_path);
            self.index.remove_entry_by_path(&file_path);
            self.index.remove_category_by_path(&file_path);
            self.index.remove_aliases_from(&file_path);
            self.index.remove_fingerprint(&file_path);
            return FileResult::Removed;
        }

        let Some(ext) = extension(fullpath) else {
            return FileResult::Ignored;
        };

        let result = if ENTRY_TYPES.contains(&ext.as_str()) {
            tracing::info!("Scanning entry: {}", file_path);
            match entry::scan_file(&self.index, &self.config, fullpath, relpath, *fixups) {
                Ok(ScanOutcome::Indexed(_)) => FileResult::Scanned,
                Ok(ScanOutcome::NeedsFixup) => FileResult::Failed,
                Err(err) => {
                    tracing::error!("Got error parsing {}: {}", file_path, err);
                    FileResult::Failed
                }
            }
        } else if CATEGORY_TYPES.contains(&ext.as_str()) {
            tracing::info!("Scanning meta info: {}", file_path);
            match category::scan_file(&self.index, fullpath, relpath) {
                Ok(_) => FileResult::Scanned,
                Err(err) => {
                    tracing::error!("Got error parsing {}: {}", file_path, err);
                    FileResult::Failed
                }
            }
        } else {
            FileResult::Ignored
        };

        if result == FileResult::Failed && !fixups {
            tracing::info!("Scheduling fixup for {}", file_path);
            self.enqueue(fullpath, relpath, true);
        } else {
            match file_fingerprint(fullpath) {
                Ok(fingerprint) => self.index.set_fingerprint(fingerprint),
                Err(err) => tracing::warn!("Could not fingerprint {}: {}", file_path, err),
            }
        }
        result
    }

    /// Queue every scannable file whose fingerprint changed, and prune vanished ones
    ///
    /// Returns the number of files queued.
    pub fn queue_changed(&self) -> usize {
        let content_dir = self.config.content_dir();
        tracing::debug!("Reindexing content from {:?}", content_dir);

        let mut queued = 0;
        for dent in WalkDir::new(&content_dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let fullpath = dent.path();
            if !is_scannable(fullpath) {
                continue;
            }

            let fingerprint = match file_fingerprint(fullpath) {
                Ok(fp) => fp,
                Err(err) => {
                    tracing::warn!("Skipping {:?}: {}", fullpath, err);
                    continue;
                }
            };
            let last = self.index.fingerprint(&fingerprint.file_path);
            if last.as_ref().map(|f| &f.fingerprint) != Some(&fingerprint.fingerprint) {
                tracing::debug!("{:?}: {:?} -> {}", fullpath, last.map(|f| f.fingerprint), fingerprint.fingerprint);
                self.enqueue(fullpath, &relative_path(&content_dir, fullpath), false);
                queued += 1;
            }
        }

        let pruned = self.index.prune_missing();
        if !pruned.is_empty() {
            tracing::info!("Pruned {} missing files", pruned.len());
        }
        queued
    }

    /// Scan the whole content directory in the background
    pub fn scan_index(self: &Arc<Self>) {
        if self.queue_changed() > 0 {
            self.schedule();
        }
    }

    /// Watch the content directory and queue every changed file
    ///
    /// The returned watcher stops watching when dropped.
    pub fn background_scan(self: &Arc<Self>) -> notify::Result<RecommendedWatcher> {
        let content_dir = self.config.content_dir();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            notify::Config::default(),
        )?;
        watcher.watch(&content_dir, RecursiveMode::Recursive)?;
        tracing::info!("Watching {:?} for changes", content_dir);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    Ok(event) => {
                        if !matches!(
                            event.kind,
                            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                        ) {
                            continue;
                        }
                        for path in event.paths {
                            if path.is_dir() {
                                continue;
                            }
                            tracing::debug!("File changed: {:?} ({:?})", path, event.kind);
                            let relpath = relative_path(&content_dir, &path);
                            this.scan_file(&path, &relpath, false);
                        }
                    }
                    Err(err) => tracing::warn!("Watcher error: {}", err),
                }
            }
        });

        Ok(watcher)
    }

    /// Rescan the content directory every `interval`
    pub fn periodic_rescan(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                tracing::debug!("Periodic rescan");
                this.scan_index();
            }
        })
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::Message;
    use std::fs;

    fn setup(files: &[(&str, &str)]) -> (tempfile::TempDir, Arc<Indexer>) {
        let dir = tempfile::tempdir().unwrap();
        let content = dir.path().join("content");
        fs::create_dir_all(&content).unwrap();
        for (rel, text) in files {
            let path = content.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, text).unwrap();
        }
        let mut config = Config::for_root("Test", dir.path());
        config.index_wait_time = 0.0;
        let indexer = Indexer::new(Arc::new(ContentIndex::new()), Arc::new(config));
        (dir, indexer)
    }

    #[test]
    fn test_is_scannable() {
        assert!(is_scannable(Path::new("a/b.md")));
        assert!(is_scannable(Path::new("a/b.HTML")));
        assert!(is_scannable(Path::new("a/_.cat")));
        assert!(!is_scannable(Path::new("a/b.png")));
        assert!(!is_scannable(Path::new("README")));
    }

    #[test]
    fn test_full_scan_with_fixups() {
        let (dir, indexer) = setup(&[
            ("blog/first.md", "Title: First\n\nHello\n"),
            ("blog/_meta.cat", "Name: The Blog\n"),
            ("blog/photo.jpg", "not scanned"),
        ]);

        assert_eq!(indexer.queue_changed(), 2);
        assert_eq!(indexer.queue_length(), 2);
        indexer.process_all();

        let index = indexer.index();
        assert_eq!(index.entry_count(), 1);
        assert_eq!(index.category("blog").unwrap().name.as_deref(), Some("The Blog"));

        // The entry needed an id, so it was rescanned with fixups and rewritten
        let message = Message::from_file(&dir.path().join("content/blog/first.md")).unwrap();
        assert_eq!(message.get("Entry-ID"), Some("1"));
        assert!(index.generation() >= 2);

        // Nothing changed, nothing queued
        assert_eq!(indexer.queue_changed(), 0);
    }

    #[test]
    fn test_existing_id_gets_date_and_uuid_written_back() {
        let (dir, indexer) = setup(&[("a.md", "Entry-ID: 1\nTitle: A\n\nBody\n")]);
        let path = dir.path().join("content/a.md");

        indexer.queue_changed();
        indexer.process_all();

        let message = Message::from_file(&path).unwrap();
        assert!(message.get("Date").is_some());
        let uuid = message.get("UUID").map(str::to_string);
        assert!(uuid.is_some());

        let first = indexer.index().entry(1).unwrap();
        assert_eq!(first.uuid, uuid);

        // Editing the body keeps the entry's identity and date
        let edited = fs::read_to_string(&path).unwrap().replace("Body", "Edited body");
        fs::write(&path, edited).unwrap();
        assert_eq!(indexer.queue_changed(), 1);
        indexer.process_all();

        let second = indexer.index().entry(1).unwrap();
        assert_eq!(second.uuid, uuid);
        assert_eq!(second.entry_date, first.entry_date);
        assert_eq!(Message::from_file(&path).unwrap().get("UUID"), uuid.as_deref());
    }

    #[test]
    fn test_removed_file_drops_records() {
        let (dir, indexer) = setup(&[(
            "gone.md",
            "Entry-ID: 3\nDate: 2020-01-01\nUUID: u\nPath-Alias: /old\n\nBye\n",
        )]);
        indexer.queue_changed();
        indexer.process_all();
        assert!(indexer.index().entry(3).is_some());

        let path = dir.path().join("content/gone.md");
        fs::remove_file(&path).unwrap();
        indexer.enqueue(&path, "gone.md", false);
        indexer.process_all();

        assert!(indexer.index().entry(3).is_none());
        assert!(indexer.index().alias("/old").is_none());
        assert!(indexer.index().fingerprint(&path.display().to_string()).is_none());
    }

    #[test]
    fn test_index_cache_is_saved() {
        let (dir, indexer) = {
            let dir = tempfile::tempdir().unwrap();
            fs::create_dir_all(dir.path().join("content")).unwrap();
            fs::write(
                dir.path().join("content/a.md"),
                "Entry-ID: 1\nDate: 2020-01-01\nUUID: u\n\nA\n",
            )
            .unwrap();
            let mut config = Config::for_root("Test", dir.path());
            config.paths.cache = Some(PathBuf::from("cache/index.json"));
            let indexer = Indexer::new(Arc::new(ContentIndex::new()), Arc::new(config));
            (dir, indexer)
        };

        indexer.queue_changed();
        indexer.process_all();

        let loaded = ContentIndex::load(&dir.path().join("cache/index.json"));
        assert_eq!(loaded.entry_count(), 1);
    }

    async fn wait_for(indexer: &Indexer, id: i64, present: bool) -> bool {
        for _ in 0..250 {
            if indexer.index().entry(id).is_some() == present && !indexer.in_progress() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_watcher_picks_up_moved_and_removed_files() {
        let (dir, indexer) = setup(&[]);
        let _watcher = indexer.background_scan().unwrap();

        // Written outside the content directory, then moved in whole
        let staged = dir.path().join("staged.md");
        fs::write(&staged, "Entry-ID: 4\nDate: 2020-01-01\nUUID: w\nTitle: New\n\nHi\n").unwrap();
        let path = dir.path().join("content/new.md");
        fs::rename(&staged, &path).unwrap();

        assert!(wait_for(&indexer, 4, true).await, "new file was never indexed");
        assert_eq!(indexer.index().entry(4).unwrap().title, "New");

        fs::remove_file(&path).unwrap();
        assert!(wait_for(&indexer, 4, false).await, "removed file was never dropped");
    }

    #[tokio::test]
    async fn test_background_worker_drains_queue() {
        let (dir, indexer) = setup(&[("a.md", "Entry-ID: 1\nDate: 2020-01-01\nUUID: u\n\nA\n")]);
        let path = dir.path().join("content/a.md");

        indexer.scan_file(&path, "a.md", false);
        for _ in 0..100 {
            if !indexer.in_progress() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert!(!indexer.in_progress());
        assert_eq!(indexer.index().entry(1).unwrap().category, "");
    }
}

//! Loading the persisted index and bringing it up to date for CLI commands.

use anyhow::{Context, Result};
use publ_core::{Config, ContentIndex, Indexer};
use std::path::Path;
use std::sync::Arc;

/// Result of bringing the index up to date
pub struct Loaded {
    pub config: Arc<Config>,
    pub indexer: Arc<Indexer>,
    /// Files queued because they changed since the cached index
    pub queued: usize,
    /// Files processed, including fixup rescans
    pub scanned: usize,
}

impl Loaded {
    pub fn index(&self) -> &ContentIndex {
        self.indexer.index()
    }
}

/// Load the configuration file
pub fn load_config(config_path: &Path) -> Result<Config> {
    Config::from_file(config_path)
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))
}

/// Start from the cached index (if configured) and an empty one otherwise
pub fn load_index(config: &Config) -> ContentIndex {
    match config.cache_path() {
        Some(path) => ContentIndex::load(&path),
        None => ContentIndex::new(),
    }
}

/// Load the config and index, then scan whatever changed, with fixups
pub fn load_and_scan(config_path: &Path) -> Result<Loaded> {
    let config = Arc::new(load_config(config_path)?);
    let content_dir = config.content_dir();
    if !content_dir.is_dir() {
        anyhow::bail!("Content directory {:?} does not exist", content_dir);
    }

    let index = Arc::new(load_index(&config));
    let indexer = Indexer::new(index, Arc::clone(&config));

    let queued = indexer.queue_changed();
    let scanned = indexer.process_all();
    tracing::debug!("Queued {} files, processed {}", queued, scanned);

    Ok(Loaded {
        config,
        indexer,
        queued,
        scanned,
    })
}

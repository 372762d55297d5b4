//! One-shot indexing.

use crate::cache::load_and_scan;
use crate::output::{envelope, ScanSummary};
use anyhow::{Context, Result};
use std::path::Path;

/// Index the content directory with fixups, then save the index cache
pub fn scan_content(config_path: &Path, json: bool) -> Result<()> {
    let loaded = load_and_scan(config_path)?;

    if let Some(cache_path) = loaded.config.cache_path() {
        loaded
            .index()
            .save(&cache_path)
            .with_context(|| format!("Failed to save index to {:?}", cache_path))?;
        tracing::debug!("Saved index to {:?}", cache_path);
    }

    let summary = ScanSummary::new(loaded.index(), loaded.queued, loaded.scanned);
    if json {
        println!("{}", serde_json::to_string_pretty(&envelope("scan", summary))?);
    } else {
        println!(
            "Indexed {} entries in {} categories ({} aliases)",
            summary.entries, summary.categories, summary.aliases
        );
        println!("{} files changed, {} scans", summary.queued, summary.scanned);
    }

    Ok(())
}

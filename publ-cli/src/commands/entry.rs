//! Show a single entry.

use super::site_now;
use crate::cache::load_and_scan;
use crate::output::{envelope, EntryData, EntrySummary};
use crate::EntryFormat;
use anyhow::{Context, Result};
use publ_core::{Entry, Message};
use publ_render::SiteContext;
use std::path::Path;

pub fn show_entry(config_path: &Path, id: i64, format: EntryFormat) -> Result<()> {
    let loaded = load_and_scan(config_path)?;
    let record = loaded
        .index()
        .entry(id)
        .with_context(|| format!("Entry {} not found", id))?;

    match format {
        EntryFormat::Headers => {
            let message = read_message(&record.file_path)?;
            for (name, value) in message.headers() {
                println!("{}: {}", name, value);
            }
        }
        EntryFormat::Json => {
            let message = read_message(&record.file_path)?;
            let data = EntryData {
                summary: EntrySummary::from(&record),
                file_path: record.file_path.clone(),
                uuid: record.uuid.clone(),
                redirect_url: record.redirect_url.clone(),
                headers: message
                    .headers()
                    .map(|(name, value)| (name.to_string(), value.to_string()))
                    .collect(),
            };
            println!("{}", serde_json::to_string_pretty(&envelope("entry", data))?);
        }
        EntryFormat::Html => {
            let site = SiteContext {
                config: &loaded.config,
                index: loaded.index(),
                user: None,
                now: site_now(&loaded.config)?,
            };
            let entry = Entry::new(record);
            let args = site.markdown_args(&entry);

            let parts = [entry.body(&args)?, entry.more(&args)?];
            for part in parts.into_iter().flatten() {
                println!("{}", part);
            }
            let footnotes = entry.footnotes(&args)?;
            if !footnotes.is_empty() {
                println!("{}", footnotes);
            }
        }
    }

    Ok(())
}

fn read_message(file_path: &str) -> Result<Message> {
    Message::from_file(Path::new(file_path)).with_context(|| format!("Failed to read {}", file_path))
}

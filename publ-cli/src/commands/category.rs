//! List a category.

use crate::cache::load_and_scan;
use crate::output::{envelope, CategoryData, EntrySummary};
use anyhow::Result;
use publ_core::Category;
use std::path::Path;

/// Print a category's entries, newest first, and its subcategories
///
/// Every status is listed, since this is an authoring view.
pub fn show_category(config_path: &Path, path: &str, recurse: bool, json: bool) -> Result<()> {
    let loaded = load_and_scan(config_path)?;
    let index = loaded.index();

    let path = path.trim_matches('/');
    if !index.category_exists(path) {
        anyhow::bail!("Category {:?} not found", path);
    }
    let category = Category::new(path);

    let mut records = index.entries_in_category(path, recurse);
    records.reverse();

    let data = CategoryData {
        path: category.path.clone(),
        name: category.name(index, &loaded.config.site.title, false),
        sort_name: category.sort_name(index),
        subcats: category
            .subcats(index, recurse)
            .into_iter()
            .map(|c| c.path)
            .collect(),
        entries: records.iter().map(EntrySummary::from).collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&envelope("category", data))?);
        return Ok(());
    }

    println!("{} (/{})", data.name, data.path);
    for subcat in &data.subcats {
        println!("  {}/", subcat);
    }
    for entry in &data.entries {
        println!(
            "  {:>6}  {}  {:<9}  {}",
            entry.id, entry.date, entry.status, entry.title
        );
    }
    Ok(())
}

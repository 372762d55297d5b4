//! Resolve a URL path through the alias table and redirect rules.

use crate::cache::load_and_scan;
use crate::output::{envelope, AliasData};
use anyhow::{Context, Result};
use publ_core::path_alias::get_redirect;
use std::path::Path;

pub fn resolve_alias(config_path: &Path, path: &str) -> Result<()> {
    let loaded = load_and_scan(config_path)?;
    let rules = loaded
        .config
        .compiled_path_regexes()
        .context("Invalid path regex in configuration")?;

    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };

    let redirect = get_redirect(loaded.index(), &rules, [path.as_str()]);
    if redirect.is_none() {
        tracing::info!("No alias or redirect for {}", path);
    }
    let data = AliasData::new(&path, redirect);
    println!("{}", serde_json::to_string_pretty(&envelope("alias", data))?);
    Ok(())
}

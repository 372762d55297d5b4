//! Categories: the directory tree that entries live in.

use crate::headers::Message;
use crate::index::ContentIndex;
use crate::markdown::render_title;
use crate::models::CategoryRecord;
use crate::path_alias::{self, AliasTarget};
use crate::scan::{category_from_relpath, ScanError};
use crate::slug::guess_title;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;

/// A category path, relative to the content root (`""` is the root)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Category {
    pub path: String,
    pub basename: String,
}

impl Category {
    pub fn new(path: &str) -> Self {
        let path = path.trim_matches('/').to_string();
        let basename = path.rsplit('/').next().unwrap_or("").to_string();
        Self { path, basename }
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// The enclosing category; the root has none
    pub fn parent(&self) -> Option<Category> {
        if self.is_root() {
            return None;
        }
        Some(match self.path.rsplit_once('/') {
            Some((parent, _)) => Category::new(parent),
            None => Category::new(""),
        })
    }

    /// URL for this category rendered with `template` (empty for the index)
    pub fn link(&self, template: &str) -> String {
        if self.is_root() {
            format!("/{}", template)
        } else {
            format!("/{}/{}", self.path, template)
        }
    }

    /// Absolute URL against the site root
    pub fn absolute_link(&self, site_root: &str, template: &str) -> String {
        format!("{}{}", site_root, self.link(template))
    }

    /// Display name, from the category's meta file or guessed from its path
    ///
    /// The root category is named after the site.
    pub fn name(&self, index: &ContentIndex, site_title: &str, markup: bool) -> String {
        let raw = index
            .category(&self.path)
            .and_then(|record| record.name)
            .unwrap_or_else(|| {
                if self.is_root() {
                    site_title.to_string()
                } else {
                    guess_title(&self.basename)
                }
            });
        render_title(&raw, markup, true)
    }

    /// Sort key: the meta file's `Sort-Name`, else the display name
    pub fn sort_name(&self, index: &ContentIndex) -> String {
        index
            .category(&self.path)
            .and_then(|record| record.sort_name.or(record.name))
            .unwrap_or_else(|| guess_title(&self.basename))
    }

    /// Subcategories of this category
    ///
    /// With `recurse`, every category below this one; otherwise only the
    /// immediate children.
    pub fn subcats(&self, index: &ContentIndex, recurse: bool) -> Vec<Category> {
        let below = index.subcategory_paths(&self.path);
        if recurse {
            return below.iter().map(|c| Category::new(c)).collect();
        }

        let depth = if self.is_root() {
            1
        } else {
            self.path.split('/').count() + 1
        };

        below
            .iter()
            .map(|c| c.split('/').take(depth).collect::<Vec<_>>().join("/"))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|c| Category::new(&c))
            .collect()
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path)
    }
}

/// Index a category metadata file (`.cat` or `.meta`)
pub fn scan_file(index: &ContentIndex, fullpath: &Path, relpath: &str) -> Result<CategoryRecord, ScanError> {
    let message = Message::from_file(fullpath)?;
    let file_path = fullpath.display().to_string();

    let category = message
        .get("Category")
        .map(|c| c.trim_matches('/').to_string())
        .unwrap_or_else(|| category_from_relpath(relpath));

    let record = CategoryRecord {
        category: category.clone(),
        file_path: file_path.clone(),
        name: message.get("Name").map(str::to_string),
        sort_name: message.get("Sort-Name").map(str::to_string),
    };
    index.upsert_category(record.clone());

    for alias in message.get_all("Path-Alias") {
        path_alias::set_alias(
            index,
            alias,
            AliasTarget::Category(category.clone()),
            Some(&file_path),
        );
    }

    Ok(record)
}

//! Template lookup by name, searching from a category up to the root.

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// Extensions tried, in order, for each template name
pub const EXT_PRIORITY: &[&str] = &["", ".html", ".htm", ".xml", ".json", ".txt"];

/// Templates compiled into the renderer
pub const BUILTIN_TEMPLATES: &[&str] = &["entry.html", "index.html", "error.html", "login.html"];

/// A resolved template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    /// The name that was looked up, e.g. `entry`
    pub name: String,
    /// Path relative to the template directory, `/`-separated
    pub filename: String,
    /// Full path on disk; `None` for built-ins
    pub file_path: Option<PathBuf>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl Template {
    pub fn is_builtin(&self) -> bool {
        self.file_path.is_none()
    }

    /// MIME type implied by the template's extension
    pub fn content_type(&self) -> &'static str {
        let ext = Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("html") | Some("htm") => "text/html; charset=utf-8",
            Some("xml") => "application/xml",
            Some("json") => "application/json",
            Some("txt") => "text/plain; charset=utf-8",
            _ => "text/html; charset=utf-8",
        }
    }

    fn on_disk(name: &str, filename: String, file_path: PathBuf) -> Self {
        let last_modified = std::fs::metadata(&file_path)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from);
        Self {
            name: name.to_string(),
            filename,
            file_path: Some(file_path),
            last_modified,
        }
    }
}

impl std::fmt::Display for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Find the best template for `category` among `names`
///
/// Each name is tried from the category's directory up to the template root,
/// with every extension in [`EXT_PRIORITY`]. Built-ins are consulted only
/// when no name matches on disk.
pub fn map_template(template_dir: &Path, category: &str, names: &[&str]) -> Option<Template> {
    for name in names {
        let mut path = category.trim_matches('/').to_string();
        loop {
            for ext in EXT_PRIORITY {
                let candidate = if path.is_empty() {
                    format!("{}{}", name, ext)
                } else {
                    format!("{}/{}{}", path, name, ext)
                };
                let file_path = template_dir.join(&candidate);
                if file_path.is_file() {
                    tracing::debug!("Template {} for {:?} -> {:?}", name, category, file_path);
                    return Some(Template::on_disk(name, candidate, file_path));
                }
            }
            if path.is_empty() {
                break;
            }
            path = path.rsplit_once('/').map(|(p, _)| p.to_string()).unwrap_or_default();
        }
    }

    for name in names {
        for ext in EXT_PRIORITY {
            let filename = format!("{}{}", name, ext);
            if BUILTIN_TEMPLATES.contains(&filename.as_str()) {
                return Some(Template {
                    name: name.to_string(),
                    filename,
                    file_path: None,
                    last_modified: None,
                });
            }
        }
    }

    None
}

type LookupKey = (String, Vec<String>);

/// Memoized [`map_template`] lookups, cleared whenever content is reindexed
pub struct TemplateCache {
    template_dir: PathBuf,
    lookups: Mutex<LruCache<LookupKey, Option<Template>>>,
}

impl TemplateCache {
    pub fn new(template_dir: PathBuf, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            template_dir,
            lookups: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, category: &str, names: &[&str]) -> Option<Template> {
        let key = (
            category.to_string(),
            names.iter().map(|n| n.to_string()).collect(),
        );
        if let Some(found) = self.lookups.lock().get(&key) {
            return found.clone();
        }

        let found = map_template(&self.template_dir, category, names);
        self.lookups.lock().put(key, found.clone());
        found
    }

    pub fn clear(&self) {
        self.lookups.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn template_dir(files: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for file in files {
            let path = dir.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "x").unwrap();
        }
        dir
    }

    #[test]
    fn test_walks_up_to_root() {
        let dir = template_dir(&["feed.xml", "blog/entry.html"]);

        let t = map_template(dir.path(), "blog/2020", &["feed"]).unwrap();
        assert_eq!(t.filename, "feed.xml");
        assert_eq!(t.content_type(), "application/xml");
        assert!(!t.is_builtin());

        let t = map_template(dir.path(), "blog/2020", &["entry"]).unwrap();
        assert_eq!(t.filename, "blog/entry.html");

        let t = map_template(dir.path(), "art", &["entry"]).unwrap();
        assert!(t.is_builtin());
        assert_eq!(t.filename, "entry.html");
    }

    #[test]
    fn test_extension_priority() {
        let dir = template_dir(&["page.txt", "page.html", "page"]);
        assert_eq!(map_template(dir.path(), "", &["page"]).unwrap().filename, "page");
    }

    #[test]
    fn test_name_order_beats_builtins() {
        let dir = template_dir(&["special.json"]);
        let t = map_template(dir.path(), "x", &["special", "index"]).unwrap();
        assert_eq!(t.name, "special");

        let t = map_template(dir.path(), "x", &["missing", "index"]).unwrap();
        assert_eq!(t.name, "index");
        assert!(t.is_builtin());

        assert_eq!(map_template(dir.path(), "x", &["missing"]), None);
    }

    #[test]
    fn test_cache_clear() {
        let dir = template_dir(&[]);
        let cache = TemplateCache::new(dir.path().to_path_buf(), 8);
        assert!(cache.get("", &["entry"]).unwrap().is_builtin());

        fs::write(dir.path().join("entry.html"), "custom").unwrap();
        assert!(cache.get("", &["entry"]).unwrap().is_builtin());

        cache.clear();
        assert!(!cache.get("", &["entry"]).unwrap().is_builtin());
    }
}

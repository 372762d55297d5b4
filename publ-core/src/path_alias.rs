//! URL aliases and redirect resolution.

use crate::category::Category;
use crate::config::PathRegex;
use crate::index::ContentIndex;
use crate::models::PathAliasRecord;

/// What an alias points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasTarget {
    Entry(i64),
    Category(String),
    Url(String),
}

/// A resolved redirect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub url: String,
    /// 301 when true, 302 otherwise
    pub permanent: bool,
}

impl Redirect {
    pub fn status_code(&self) -> u16 {
        if self.permanent {
            301
        } else {
            302
        }
    }
}

/// Register an alias from a `Path-Alias` spec of the form `path [template]`
///
/// An existing alias for the same path is replaced.
pub fn set_alias(index: &ContentIndex, spec: &str, target: AliasTarget, source_file: Option<&str>) {
    let mut parts = spec.split_whitespace();
    let Some(path) = parts.next() else {
        tracing::warn!("Ignoring empty path alias");
        return;
    };

    let mut record = PathAliasRecord {
        path: path.to_string(),
        template: parts.next().map(str::to_string),
        source_file: source_file.map(str::to_string),
        ..Default::default()
    };
    match target {
        AliasTarget::Entry(id) => record.entry = Some(id),
        AliasTarget::Category(category) => record.category = Some(category),
        AliasTarget::Url(url) => record.url = Some(url),
    }

    tracing::debug!("Setting path alias {} -> {:?}", record.path, record);
    index.upsert_alias(record);
}

pub fn remove_alias(index: &ContentIndex, path: &str) {
    index.remove_alias(path);
}

/// Resolve a single path through the alias table
pub fn get_alias(index: &ContentIndex, path: &str) -> Option<Redirect> {
    let record = index.alias(path)?;

    let template = record.template.as_deref().filter(|t| *t != "index");

    if let Some(entry_id) = record.entry {
        let Some(entry) = index.entry(entry_id) else {
            tracing::debug!("Alias {} points at missing entry {}", path, entry_id);
            return None;
        };

        if record.template.is_some() {
            // A template was requested, so we go to the category page
            let category = record.category.clone().unwrap_or(entry.category.clone());
            let link = Category::new(&category).link(template.unwrap_or(""));
            return Some(Redirect {
                url: format!("{}?start={}", link, entry.id),
                permanent: true,
            });
        }

        // Entries with a soft redirect go wherever that points
        if let Some(url) = entry.redirect_url {
            return Some(Redirect {
                url,
                permanent: false,
            });
        }

        return Some(Redirect {
            url: entry.permalink(),
            permanent: true,
        });
    }

    if let Some(category) = &record.category {
        return Some(Redirect {
            url: Category::new(category).link(template.unwrap_or("")),
            permanent: true,
        });
    }

    // Outbound URLs may be changed by the author, so never cache them permanently
    record.url.map(|url| Redirect {
        url,
        permanent: false,
    })
}

/// Find a redirect for any of `paths`, consulting aliases and then regex rules
pub fn get_redirect<'a, I>(index: &ContentIndex, rules: &[PathRegex], paths: I) -> Option<Redirect>
where
    I: IntoIterator<Item = &'a str>,
{
    for path in paths {
        if let Some(redirect) = get_alias(index, path) {
            return Some(redirect);
        }

        let trimmed = path.trim_start_matches('/');
        for rule in rules {
            if let Some(url) = rule.apply(trimmed) {
                return Some(Redirect {
                    url,
                    permanent: rule.permanent,
                });
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::{EntryRecord, EntryType, PublishStatus};
    use chrono::{FixedOffset, TimeZone};

    fn index_with_entry(redirect: Option<&str>) -> ContentIndex {
        let index = ContentIndex::new();
        index.upsert_entry(EntryRecord {
            id: 12,
            file_path: "/nonexistent/blog/post.md".into(),
            category: "blog".into(),
            status: PublishStatus::Published,
            entry_type: EntryType::Entry,
            slug_text: "Post".into(),
            redirect_url: redirect.map(str::to_string),
            title: "Post".into(),
            entry_date: FixedOffset::east_opt(0)
                .unwrap()
                .with_ymd_and_hms(2020, 1, 1, 0, 0, 0)
                .unwrap(),
            uuid: None,
        });
        index
    }

    #[test]
    fn test_entry_alias() {
        let index = index_with_entry(None);
        set_alias(&index, "/old/post.php", AliasTarget::Entry(12), None);

        let redirect = get_alias(&index, "/old/post.php").unwrap();
        assert_eq!(redirect.url, "/blog/12-Post");
        assert!(redirect.permanent);
        assert_eq!(redirect.status_code(), 301);
    }

    #[test]
    fn test_entry_alias_with_template() {
        let index = index_with_entry(None);
        set_alias(&index, "/feed-start feed", AliasTarget::Entry(12), None);
        set_alias(&index, "/index-start index", AliasTarget::Entry(12), None);

        assert_eq!(
            get_alias(&index, "/feed-start").unwrap().url,
            "/blog/feed?start=12"
        );
        assert_eq!(
            get_alias(&index, "/index-start").unwrap().url,
            "/blog/?start=12"
        );
    }

    #[test]
    fn test_entry_with_redirect_is_temporary() {
        let index = index_with_entry(Some("https://elsewhere.example/"));
        set_alias(&index, "/moved", AliasTarget::Entry(12), None);

        let redirect = get_alias(&index, "/moved").unwrap();
        assert_eq!(redirect.url, "https://elsewhere.example/");
        assert!(!redirect.permanent);
    }

    #[test]
    fn test_category_and_url_aliases() {
        let index = ContentIndex::new();
        set_alias(&index, "/photos", AliasTarget::Category("art/photos".into()), None);
        set_alias(&index, "/rss feed", AliasTarget::Category("".into()), None);
        set_alias(&index, "/gh", AliasTarget::Url("https://github.com/".into()), None);

        assert_eq!(get_alias(&index, "/photos").unwrap().url, "/art/photos/");
        assert_eq!(get_alias(&index, "/rss").unwrap().url, "/feed");

        let gh = get_alias(&index, "/gh").unwrap();
        assert_eq!(gh.url, "https://github.com/");
        assert!(!gh.permanent);

        remove_alias(&index, "/gh");
        assert_eq!(get_alias(&index, "/gh"), None);
    }

    #[test]
    fn test_get_redirect_falls_back_to_regex() {
        let index = index_with_entry(None);
        let config = Config::from_yaml(
            "site:\n  title: T\npath_regexes:\n  - pattern: '^archive/(\\d+)$'\n    target: '/\\1'\n",
        )
        .unwrap();
        let rules = config.compiled_path_regexes().unwrap();

        let redirect = get_redirect(&index, &rules, ["/nothing", "/archive/12"]).unwrap();
        assert_eq!(redirect.url, "/12");
        assert!(!redirect.permanent);
        assert_eq!(get_redirect(&index, &rules, ["/nothing"]), None);
    }
}

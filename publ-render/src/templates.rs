//! Askama template definitions and page rendering.

use crate::views::{CategoryView, EntryView, SiteContext, TemplateInfo, UserView};
use askama::Template;
use chrono::{DateTime, FixedOffset};
use publ_core::{Category, Entry, EntryType, ScanError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Template error: {0}")]
    Template(#[from] askama::Error),

    #[error(transparent)]
    Content(#[from] ScanError),
}

/// Single entry page
#[derive(Template)]
#[template(path = "entry.html")]
pub struct EntryTemplate {
    pub entry: EntryView,
    pub category: CategoryView,
    pub user: Option<UserView>,
    pub template: TemplateInfo,
    pub site_title: String,
}

/// Category listing page
#[derive(Template)]
#[template(path = "index.html")]
pub struct CategoryTemplate {
    pub category: CategoryView,
    pub parent: Option<CategoryView>,
    pub subcats: Vec<CategoryView>,
    pub entries: Vec<EntryView>,
    /// Link to the next page of older entries
    pub older: Option<String>,
    pub user: Option<UserView>,
    pub template: TemplateInfo,
    pub site_title: String,
}

/// Error page
#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorTemplate {
    pub code: u16,
    pub message: String,
    pub detail: Option<String>,
    pub url_root: String,
    pub timestamp: String,
}

/// Login page
#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub site_title: String,
    pub user: Option<UserView>,
    /// Where to go once signed in
    pub redir: String,
}

/// Entries shown per category page
pub const ENTRIES_PER_PAGE: usize = 20;

/// Render an entry page with the named template
pub fn render_entry(entry: &Entry, site: &SiteContext<'_>, template_name: &str) -> Result<String, RenderError> {
    tracing::debug!("Rendering entry {} with {}", entry.id(), template_name);
    let page = EntryTemplate {
        entry: EntryView::build(entry, site)?,
        category: CategoryView::new(&entry.category(), site),
        user: site.user_view(),
        template: TemplateInfo {
            name: template_name.to_string(),
        },
        site_title: site.config.site.title.clone(),
    };
    Ok(page.render()?)
}

/// Render a category page, newest entries first
///
/// With `start`, the listing begins at that entry instead of the newest.
pub fn render_category(
    category: &Category,
    site: &SiteContext<'_>,
    template_name: &str,
    start: Option<i64>,
) -> Result<String, RenderError> {
    let mut records: Vec<_> = site
        .index
        .entries_in_category(&category.path, false)
        .into_iter()
        .filter(|e| e.entry_type == EntryType::Entry && e.is_visible(site.now))
        .collect();
    records.reverse();

    if let Some(start) = start {
        if let Some(pos) = records.iter().position(|e| e.id == start) {
            records.drain(..pos);
        }
    }

    let older = records
        .get(ENTRIES_PER_PAGE)
        .map(|e| format!("{}?start={}", category.link(template_name_for_link(template_name)), e.id));

    let entries = records
        .into_iter()
        .take(ENTRIES_PER_PAGE)
        .map(|record| EntryView::listing(&Entry::new(record), site))
        .collect::<Result<Vec<_>, _>>()?;

    let page = CategoryTemplate {
        category: CategoryView::new(category, site),
        parent: category.parent().map(|p| CategoryView::new(&p, site)),
        subcats: category
            .subcats(site.index, false)
            .iter()
            .map(|c| CategoryView::new(c, site))
            .collect(),
        entries,
        older,
        user: site.user_view(),
        template: TemplateInfo {
            name: template_name.to_string(),
        },
        site_title: site.config.site.title.clone(),
    };
    Ok(page.render()?)
}

fn template_name_for_link(template_name: &str) -> &str {
    if template_name == "index" {
        ""
    } else {
        template_name
    }
}

/// Render the error page
pub fn render_error(
    code: u16,
    message: &str,
    detail: Option<String>,
    url_root: &str,
    now: DateTime<FixedOffset>,
) -> Result<String, RenderError> {
    let page = ErrorTemplate {
        code,
        message: message.to_string(),
        detail,
        url_root: url_root.to_string(),
        timestamp: now.to_rfc3339(),
    };
    Ok(page.render()?)
}

/// Render the login page
pub fn render_login(site: &SiteContext<'_>, redir: &str) -> Result<String, RenderError> {
    let page = LoginTemplate {
        site_title: site.config.site.title.clone(),
        user: site.user_view(),
        redir: redir.to_string(),
    };
    Ok(page.render()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use publ_core::entry::scan_file;
    use publ_core::{Config, ContentIndex, ScanOutcome, User};
    use std::fs;

    struct Site {
        _dir: tempfile::TempDir,
        config: Config,
        index: ContentIndex,
    }

    fn site(files: &[(&str, &str)]) -> Site {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::for_root("Test Site", dir.path());
        let index = ContentIndex::new();
        for (rel, text) in files {
            let path = config.content_dir().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, text).unwrap();
            let outcome = scan_file(&index, &config, &path, rel, true).unwrap();
            assert!(matches!(outcome, ScanOutcome::Indexed(_)));
        }
        Site {
            _dir: dir,
            config,
            index,
        }
    }

    fn now() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .unwrap()
    }

    const FIRST: &str = "Title: First\nEntry-ID: 1\nDate: 2020-01-01\nStatus: published\n\nOne\n";
    const SECOND: &str = "Title: Second *post*\nEntry-ID: 2\nDate: 2020-02-01\nStatus: published\n\n\
                          Body with a note[^x].\n\n[^x]: The note.\n\n~~~~~\nMore text.\n";
    const THIRD: &str = "Title: Third\nEntry-ID: 3\nDate: 2020-03-01\nStatus: published\nAuth: @staff\n\nSecret\n";

    #[test]
    fn test_entry_page() {
        let s = site(&[("blog/1.md", FIRST), ("blog/2.md", SECOND), ("blog/3.md", THIRD)]);
        let ctx = SiteContext {
            config: &s.config,
            index: &s.index,
            user: None,
            now: now(),
        };
        let entry = Entry::new(s.index.entry(2).unwrap());
        let html = render_entry(&entry, &ctx, "entry").unwrap();

        assert!(html.contains(r#"<body id="entry">"#));
        assert!(html.contains("<title>Second post - Test Site</title>"));
        assert!(html.contains("Second <em>post</em>"));
        assert!(html.contains(r#"href="/blog/1-First""#));
        assert!(html.contains(r#"href="/blog/3-Third""#));
        assert!(html.contains(r#"<li id="d_e2_fn1">"#));
        assert!(html.contains("More text."));
        assert!(html.contains(r#"href="/blog/""#));
        assert!(html.contains("webmention"));
    }

    #[test]
    fn test_unauthorized_entry_hides_content() {
        let s = site(&[("blog/3.md", THIRD)]);
        let entry = Entry::new(s.index.entry(3).unwrap());

        let anonymous = SiteContext {
            config: &s.config,
            index: &s.index,
            user: None,
            now: now(),
        };
        let html = render_entry(&entry, &anonymous, "entry").unwrap();
        assert!(!html.contains("Secret"));
        assert!(html.contains("/_login?redir=/blog/3-Third"));

        let bob = User::new("bob", vec![]);
        let signed_in = SiteContext {
            user: Some(&bob),
            ..anonymous
        };
        let html = render_entry(&entry, &signed_in, "entry").unwrap();
        assert!(!html.contains("Secret"));
        assert!(html.contains("bob"));

        let staff = User::new("sam", vec!["staff".into()]);
        let allowed = SiteContext {
            user: Some(&staff),
            ..signed_in
        };
        let html = render_entry(&entry, &allowed, "entry").unwrap();
        assert!(html.contains("Secret"));
    }

    #[test]
    fn test_category_page() {
        let s = site(&[
            ("blog/1.md", FIRST),
            ("blog/2.md", SECOND),
            ("blog/old/x.md", "Title: X\nEntry-ID: 9\nDate: 2019-01-01\nStatus: published\n\nX\n"),
        ]);
        let ctx = SiteContext {
            config: &s.config,
            index: &s.index,
            user: None,
            now: now(),
        };
        let html = render_category(&Category::new("blog"), &ctx, "index", None).unwrap();

        let second = html.find("/blog/2-Second-post-").unwrap();
        let first = html.find("/blog/1-First").unwrap();
        assert!(second < first);
        assert!(html.contains(r#"href="/blog/old/""#));
        assert!(html.contains(r##"href="/blog/2-Second-post-#d_e2_fn1""##));

        let html = render_category(&Category::new("blog"), &ctx, "index", Some(1)).unwrap();
        assert!(!html.contains("/blog/2-Second-post-"));
    }

    #[test]
    fn test_error_and_login_pages() {
        let html = render_error(404, "Not Found", None, "http://localhost/", now()).unwrap();
        assert!(html.contains("<h1>Not Found</h1>"));
        assert!(html.contains("404"));

        let s = site(&[]);
        let ctx = SiteContext {
            config: &s.config,
            index: &s.index,
            user: None,
            now: now(),
        };
        let html = render_login(&ctx, "/blog/").unwrap();
        assert!(html.contains(r#"href="/blog/""#));
    }
}

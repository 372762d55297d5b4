//! View models handed to the askama templates.
//!
//! Everything a template reads is computed up front, so rendering never
//! touches the filesystem or the index.

use chrono::{DateTime, FixedOffset, SecondsFormat};
use publ_core::markdown::MarkdownArgs;
use publ_core::{CardData, Category, Config, ContentIndex, Entry, ScanError, User};
use serde::Serialize;

/// A timestamp with the formatting helpers templates expect
#[derive(Debug, Clone, Serialize)]
pub struct Timestamp {
    datetime: DateTime<FixedOffset>,
    #[serde(skip)]
    now: DateTime<FixedOffset>,
}

impl Timestamp {
    pub fn new(datetime: DateTime<FixedOffset>, now: DateTime<FixedOffset>) -> Self {
        Self { datetime, now }
    }

    pub fn datetime(&self) -> DateTime<FixedOffset> {
        self.datetime
    }

    pub fn isoformat(&self) -> String {
        self.datetime.to_rfc3339_opts(SecondsFormat::Secs, false)
    }

    /// Format with a strftime-style pattern
    pub fn format(&self, pattern: &str) -> String {
        self.datetime.format(pattern).to_string()
    }

    /// Relative description such as "3 days ago" or "in an hour"
    pub fn humanize(&self) -> String {
        let seconds = self.now.signed_duration_since(self.datetime).num_seconds();
        let future = seconds < 0;
        let seconds = seconds.abs();

        const MINUTE: i64 = 60;
        const HOUR: i64 = 60 * MINUTE;
        const DAY: i64 = 24 * HOUR;

        let amount = match seconds {
            s if s < 45 => return String::from("just now"),
            s if s < 90 => String::from("a minute"),
            s if s < 45 * MINUTE => format!("{} minutes", (s + 30) / MINUTE),
            s if s < 90 * MINUTE => String::from("an hour"),
            s if s < 22 * HOUR => format!("{} hours", (s + HOUR / 2) / HOUR),
            s if s < 36 * HOUR => String::from("a day"),
            s if s < 26 * DAY => format!("{} days", (s + DAY / 2) / DAY),
            s if s < 46 * DAY => String::from("a month"),
            s if s < 320 * DAY => format!("{} months", (s + 15 * DAY) / (30 * DAY)),
            s if s < 548 * DAY => String::from("a year"),
            s => format!("{} years", (s + 182 * DAY) / (365 * DAY)),
        };

        if future {
            format!("in {}", amount)
        } else {
            format!("{} ago", amount)
        }
    }
}

/// Link to a neighbouring entry
#[derive(Debug, Clone, Serialize)]
pub struct NavLink {
    pub link: String,
    pub title: String,
    pub title_plain: String,
}

impl NavLink {
    fn from_entry(entry: &Entry, smartquotes: bool) -> Self {
        Self {
            link: entry.link(),
            title: entry.title(true, smartquotes),
            title_plain: entry.title(false, smartquotes),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryView {
    pub path: String,
    pub link: String,
    pub name: String,
    pub name_plain: String,
}

impl CategoryView {
    pub fn new(category: &Category, site: &SiteContext<'_>) -> Self {
        let title = &site.config.site.title;
        Self {
            path: category.path.clone(),
            link: category.link(""),
            name: category.name(site.index, title, true),
            name_plain: category.name(site.index, title, false),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateInfo {
    pub name: String,
}

/// Shared inputs for building any page
pub struct SiteContext<'a> {
    pub config: &'a Config,
    pub index: &'a ContentIndex,
    pub user: Option<&'a User>,
    pub now: DateTime<FixedOffset>,
}

impl SiteContext<'_> {
    pub fn user_view(&self) -> Option<UserView> {
        self.user.map(|u| UserView {
            name: u.name.clone(),
        })
    }

    /// Markdown settings for rendering `entry` on this site
    pub fn markdown_args(&self, entry: &Entry) -> MarkdownArgs {
        MarkdownArgs {
            smartquotes: self.config.markdown.smartquotes,
            code_highlight: self.config.markdown.code_highlight,
            code_number_links: Some(entry.permalink()),
            ..MarkdownArgs::default()
        }
    }
}

/// Everything the entry template shows about one entry
#[derive(Debug, Clone, Serialize)]
pub struct EntryView {
    pub id: i64,
    pub title: String,
    pub title_plain: String,
    pub stylesheet: String,
    pub permalink: String,
    pub absolute_permalink: String,
    pub link: String,
    pub date: Timestamp,
    pub last_modified: Timestamp,
    pub file_path: String,
    pub summary: Option<String>,
    pub body: Option<String>,
    pub more: Option<String>,
    pub footnotes: String,
    pub toc: String,
    pub card: CardData,
    pub is_unauthorized: bool,
    pub login: String,
    pub previous: Option<NavLink>,
    pub next: Option<NavLink>,
}

/// Number of card images gathered for an entry page
const CARD_IMAGES: usize = 1;

impl EntryView {
    /// Build the full view of an entry page
    ///
    /// Content of an entry the user may not read is left out entirely.
    pub fn build(entry: &Entry, site: &SiteContext<'_>) -> Result<Self, ScanError> {
        let mut view = Self::headline(entry, site)?;
        view.previous = entry
            .previous(site.index, site.now)
            .map(|e| NavLink::from_entry(&e, site.config.markdown.smartquotes));
        view.next = entry
            .next(site.index, site.now)
            .map(|e| NavLink::from_entry(&e, site.config.markdown.smartquotes));

        if view.is_unauthorized {
            return Ok(view);
        }

        let body_args = MarkdownArgs {
            footnotes_class: Some("footnotes".into()),
            heading_link_class: Some("toc-link".into()),
            ..site.markdown_args(entry)
        };
        view.summary = entry.summary(&body_args)?;
        view.body = entry.body(&body_args)?;
        view.more = entry.more(&body_args)?;
        view.footnotes = entry.footnotes(&body_args)?;
        view.toc = entry.toc(&body_args, site.config.markdown.toc_max_level)?;
        view.card = entry.card(CARD_IMAGES)?;
        Ok(view)
    }

    /// The view used in category listings: summary and body, no navigation
    ///
    /// Footnote links point at the entry's own page.
    pub fn listing(entry: &Entry, site: &SiteContext<'_>) -> Result<Self, ScanError> {
        let mut view = Self::headline(entry, site)?;
        if view.is_unauthorized {
            return Ok(view);
        }

        let args = MarkdownArgs {
            footnotes_link: entry.permalink(),
            toc_link: entry.permalink(),
            ..site.markdown_args(entry)
        };
        view.summary = entry.summary(&args)?;
        view.body = entry.body(&args)?;
        view.footnotes = entry.footnotes(&args)?;
        Ok(view)
    }

    fn headline(entry: &Entry, site: &SiteContext<'_>) -> Result<Self, ScanError> {
        let smartquotes = site.config.markdown.smartquotes;
        let permalink = entry.permalink();
        Ok(Self {
            id: entry.id(),
            title: entry.title(true, smartquotes),
            title_plain: entry.title(false, smartquotes),
            stylesheet: entry.stylesheet()?,
            absolute_permalink: format!("{}{}", site.config.site_root(), permalink),
            permalink,
            link: entry.link(),
            date: Timestamp::new(entry.date(), site.now),
            last_modified: Timestamp::new(entry.last_modified()?, site.now),
            file_path: entry.file_path().to_string(),
            summary: None,
            body: None,
            more: None,
            footnotes: String::new(),
            toc: String::new(),
            card: CardData::default(),
            is_unauthorized: entry.is_unauthorized(site.user)?,
            login: entry.login(&site.config.auth.login_url),
            previous: None,
            next: None,
        })
    }
}

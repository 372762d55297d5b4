//! Entry scanning and the entry view used by templates.

use crate::cards::{extract_card, CardData};
use crate::category::Category;
use crate::config::Config;
use crate::headers::Message;
use crate::index::ContentIndex;
use crate::markdown::{
    footnotes_to_html, get_counters, render_title, to_html, toc_to_html, ItemCounter, MarkdownArgs,
};
use crate::models::{EntryRecord, EntryType, PublishStatus};
use crate::path_alias::{self, AliasTarget};
use crate::scan::{category_from_relpath, file_mtime, format_date, parse_date, ScanError, ScanOutcome};
use crate::slug::{guess_title, make_slug};
use chrono::{DateTime, FixedOffset};
use once_cell::sync::OnceCell;
use std::io::Write;
use std::path::Path;

/// Separator between the body and the "read more" part of an entry
const MORE_SEPARATOR: &str = "\n~~~~~\n";

/// Index an entry file
///
/// Without `assign_id`, a file that lacks an `Entry-ID` (or whose id belongs
/// to another file) is left alone and reported as [`ScanOutcome::NeedsFixup`].
/// A file that has its id but lacks a `Date` or `UUID` is indexed, so the id
/// stays claimed, and is also reported as needing a fixup. With `assign_id`,
/// missing ids, dates and UUIDs are filled in and written back.
pub fn scan_file(
    index: &ContentIndex,
    config: &Config,
    fullpath: &Path,
    relpath: &str,
    assign_id: bool,
) -> Result<ScanOutcome, ScanError> {
    let mut message = Message::from_file(fullpath)?;
    let file_path = fullpath.display().to_string();

    let requested_id = match message.get("Entry-ID") {
        Some(raw) => Some(raw.trim().parse::<i64>().map_err(|_| ScanError::InvalidId {
            path: file_path.clone(),
            value: raw.to_string(),
        })?),
        None => None,
    };
    if requested_id.is_none() && !assign_id {
        return Ok(ScanOutcome::NeedsFixup);
    }

    let mut fixup_needed =
        requested_id.is_none() || !message.contains("Date") || !message.contains("UUID");

    let basename = Path::new(relpath)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(relpath);
    let title = message
        .get("Title")
        .map(str::to_string)
        .unwrap_or_else(|| guess_title(basename));

    let invalid = |source| ScanError::InvalidValue {
        path: file_path.clone(),
        source,
    };
    let status: PublishStatus = match message.get("Status") {
        Some(raw) => raw.parse().map_err(invalid)?,
        None => PublishStatus::default(),
    };
    let entry_type: EntryType = match message.get("Type") {
        Some(raw) => raw.parse().map_err(invalid)?,
        None => EntryType::default(),
    };

    let tz = config.timezone()?;
    let entry_date = match message.get("Date") {
        Some(raw) => parse_date(raw, &tz).ok_or_else(|| ScanError::InvalidDate {
            path: file_path.clone(),
            value: raw.to_string(),
        })?,
        None => {
            let date = file_mtime(fullpath, &tz)?;
            message.set("Date", format_date(&date));
            date
        }
    };

    let same_file = index.entry_by_path(&file_path);
    let id = match requested_id {
        Some(id) => match index.entry(id) {
            Some(other) if other.file_path != file_path && Path::new(&other.file_path).is_file() => {
                if !assign_id {
                    tracing::debug!(
                        "Entry ID {} for {} collides with {}",
                        id,
                        file_path,
                        other.file_path
                    );
                    return Ok(ScanOutcome::NeedsFixup);
                }
                tracing::warn!(
                    "Entry ID {} for {} already belongs to {}; assigning a new ID",
                    id,
                    file_path,
                    other.file_path
                );
                fixup_needed = true;
                same_file
                    .as_ref()
                    .map(|e| e.id)
                    .filter(|existing| *existing != id)
                    .unwrap_or_else(|| index.next_entry_id())
            }
            _ => id,
        },
        None => same_file
            .as_ref()
            .map(|e| e.id)
            .unwrap_or_else(|| index.next_entry_id()),
    };

    let record = EntryRecord {
        id,
        file_path: file_path.clone(),
        category: message
            .get("Category")
            .map(|c| c.trim_matches('/').to_string())
            .unwrap_or_else(|| category_from_relpath(relpath)),
        status,
        entry_type,
        slug_text: make_slug(message.get("Slug-Text").unwrap_or(title.as_str())),
        redirect_url: message.get("Redirect-To").map(str::to_string),
        title,
        entry_date,
        uuid: None,
    };

    message.set("Entry-ID", id.to_string());
    if !message.contains("UUID") {
        message.set("UUID", uuid::Uuid::new_v4().to_string());
    }
    let record = EntryRecord {
        uuid: message.get("UUID").map(str::to_string),
        ..record
    };

    tracing::debug!("Indexed entry {} from {}", record.id, file_path);
    index.upsert_entry(record.clone());

    index.remove_aliases_from(&file_path);
    for alias in message.get_all("Path-Alias") {
        path_alias::set_alias(index, alias, AliasTarget::Entry(record.id), Some(&file_path));
    }

    if fixup_needed && !assign_id {
        tracing::debug!("{} is missing headers; deferring to a fixup pass", file_path);
        return Ok(ScanOutcome::NeedsFixup);
    }
    if fixup_needed {
        tracing::info!("Writing fixed-up headers to {}", file_path);
        rewrite_file(fullpath, &message)?;
    }

    Ok(ScanOutcome::Indexed(record))
}

/// Replace a file's contents atomically via a temp file in the same directory
fn rewrite_file(fullpath: &Path, message: &Message) -> Result<(), ScanError> {
    let dir = fullpath.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| ScanError::io(dir, e))?;
    tmp.write_all(message.to_string().as_bytes())
        .map_err(|e| ScanError::io(tmp.path(), e))?;
    tmp.persist(fullpath)
        .map_err(|e| ScanError::io(fullpath, e.error))?;
    Ok(())
}

/// The signed-in user, as reported by the fronting proxy
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct User {
    pub name: String,
    pub groups: Vec<String>,
}

impl User {
    pub fn new(name: impl Into<String>, groups: Vec<String>) -> Self {
        Self {
            name: name.into(),
            groups,
        }
    }

    fn matches(&self, principal: &str) -> bool {
        if principal == "*" {
            return true;
        }
        match principal.strip_prefix('@') {
            Some(group) => self.groups.iter().any(|g| g == group),
            None => principal == self.name,
        }
    }
}

/// Whether `user` may see content protected by an `Auth` header value
///
/// Principals are checked in order and the last one that matches decides.
pub fn is_authorized(auth: &str, user: Option<&User>) -> bool {
    let Some(user) = user else {
        return false;
    };

    let mut allowed = false;
    for principal in auth.split_whitespace() {
        match principal.strip_prefix('!') {
            Some(denied) if user.matches(denied) => allowed = false,
            Some(_) => {}
            None if user.matches(principal) => allowed = true,
            None => {}
        }
    }
    allowed
}

struct Payload {
    message: Message,
    body: Option<String>,
    more: Option<String>,
    is_markdown: bool,
}

/// A view over an indexed entry; the file is read on first use
pub struct Entry {
    record: EntryRecord,
    payload: OnceCell<Payload>,
}

impl Entry {
    pub fn new(record: EntryRecord) -> Self {
        Self {
            record,
            payload: OnceCell::new(),
        }
    }

    fn payload(&self) -> Result<&Payload, ScanError> {
        self.payload.get_or_try_init(|| {
            let path = Path::new(&self.record.file_path);
            let message = Message::from_file(path)?;

            let (body, more) = match message.body().split_once(MORE_SEPARATOR) {
                Some((body, more)) => (body.to_string(), more.to_string()),
                None => (message.body().to_string(), String::new()),
            };
            let is_markdown = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("md"));

            Ok(Payload {
                body: Some(body).filter(|b| !b.trim().is_empty()),
                more: Some(more).filter(|m| !m.trim().is_empty()),
                message,
                is_markdown,
            })
        })
    }

    pub fn record(&self) -> &EntryRecord {
        &self.record
    }

    pub fn id(&self) -> i64 {
        self.record.id
    }

    pub fn file_path(&self) -> &str {
        &self.record.file_path
    }

    pub fn date(&self) -> DateTime<FixedOffset> {
        self.record.entry_date
    }

    pub fn status(&self) -> PublishStatus {
        self.record.status
    }

    pub fn category(&self) -> Category {
        Category::new(&self.record.category)
    }

    /// The entry's own URL, ignoring any redirect
    pub fn permalink(&self) -> String {
        self.record.permalink()
    }

    /// Where links to this entry should point
    pub fn link(&self) -> String {
        self.record
            .redirect_url
            .clone()
            .unwrap_or_else(|| self.permalink())
    }

    pub fn get(&self, name: &str) -> Result<Option<String>, ScanError> {
        Ok(self.payload()?.message.get(name).map(str::to_string))
    }

    pub fn get_all(&self, name: &str) -> Result<Vec<String>, ScanError> {
        Ok(self
            .payload()?
            .message
            .get_all(name)
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    pub fn title(&self, markup: bool, smartquotes: bool) -> String {
        render_title(&self.record.title, markup, smartquotes)
    }

    /// Per-entry stylesheet, `style.css` unless the entry names one
    pub fn stylesheet(&self) -> Result<String, ScanError> {
        Ok(self
            .get("Stylesheet")?
            .unwrap_or_else(|| String::from("style.css")))
    }

    fn render(
        &self,
        text: &str,
        args: &MarkdownArgs,
        counter: &mut ItemCounter,
        toc: &mut Vec<(u32, String)>,
        footnotes: &mut Vec<String>,
    ) -> Result<String, ScanError> {
        if self.payload()?.is_markdown {
            Ok(to_html(text, args, counter, Some(self.id()), toc, footnotes))
        } else {
            Ok(text.to_string())
        }
    }

    /// The `Summary` header, rendered
    pub fn summary(&self, args: &MarkdownArgs) -> Result<Option<String>, ScanError> {
        let Some(summary) = self.get("Summary")? else {
            return Ok(None);
        };
        let mut counter = ItemCounter::default();
        let html = self.render(&summary, args, &mut counter, &mut Vec::new(), &mut Vec::new())?;
        Ok(Some(html))
    }

    /// The part of the entry before the `~~~~~` separator
    pub fn body(&self, args: &MarkdownArgs) -> Result<Option<String>, ScanError> {
        let Some(body) = self.payload()?.body.as_deref() else {
            return Ok(None);
        };
        let mut counter = ItemCounter::default();
        let html = self.render(body, args, &mut counter, &mut Vec::new(), &mut Vec::new())?;
        Ok(Some(html))
    }

    /// The part of the entry after the separator, numbered after the body
    pub fn more(&self, args: &MarkdownArgs) -> Result<Option<String>, ScanError> {
        let payload = self.payload()?;
        let Some(more) = payload.more.as_deref() else {
            return Ok(None);
        };
        let mut counter = self.body_counter(args)?;
        let html = self.render(more, args, &mut counter, &mut Vec::new(), &mut Vec::new())?;
        Ok(Some(html))
    }

    fn body_counter(&self, args: &MarkdownArgs) -> Result<ItemCounter, ScanError> {
        let payload = self.payload()?;
        Ok(match (&payload.body, payload.is_markdown) {
            (Some(body), true) => get_counters(body, args),
            _ => ItemCounter::default(),
        })
    }

    /// Render body and more in sequence, collecting the toc and footnote buffers
    fn collect(&self, args: &MarkdownArgs) -> Result<(Vec<(u32, String)>, Vec<String>), ScanError> {
        let payload = self.payload()?;
        let mut counter = ItemCounter::default();
        let mut toc = Vec::new();
        let mut footnotes = Vec::new();

        for part in [&payload.body, &payload.more].into_iter().flatten() {
            self.render(part, args, &mut counter, &mut toc, &mut footnotes)?;
        }
        Ok((toc, footnotes))
    }

    /// Footnotes from the body and more, as one ordered list
    pub fn footnotes(&self, args: &MarkdownArgs) -> Result<String, ScanError> {
        let (_, footnotes) = self.collect(args)?;
        Ok(footnotes_to_html(&footnotes, args.footnotes_class.as_deref()))
    }

    /// Table of contents for the whole entry
    pub fn toc(&self, args: &MarkdownArgs, max_level: Option<u32>) -> Result<String, ScanError> {
        let (toc, _) = self.collect(args)?;
        Ok(toc_to_html(&toc, max_level))
    }

    /// Social-preview data for the entry's body
    pub fn card(&self, count: usize) -> Result<CardData, ScanError> {
        let payload = self.payload()?;
        let text = payload.body.as_deref().unwrap_or("");
        Ok(extract_card(text, payload.is_markdown, count))
    }

    /// Modification time of the entry's file, in the entry's own offset
    pub fn last_modified(&self) -> Result<DateTime<FixedOffset>, ScanError> {
        file_mtime(Path::new(&self.record.file_path), self.record.entry_date.offset())
    }

    /// Whether `user` is barred from reading this entry
    pub fn is_unauthorized(&self, user: Option<&User>) -> Result<bool, ScanError> {
        Ok(match self.get("Auth")? {
            Some(auth) => !is_authorized(&auth, user),
            None => false,
        })
    }

    /// Login URL that returns to this entry afterwards
    pub fn login(&self, login_url: &str) -> String {
        format!("{}?redir={}", login_url, self.permalink())
    }

    pub fn previous(&self, index: &ContentIndex, now: DateTime<FixedOffset>) -> Option<Entry> {
        index.previous(&self.record, now).map(Entry::new)
    }

    pub fn next(&self, index: &ContentIndex, now: DateTime<FixedOffset>) -> Option<Entry> {
        index.next(&self.record, now).map(Entry::new)
    }
}

//! Markdown rendering for entry content and titles.
//!
//! Headings get stable anchors and feed a table-of-contents buffer, footnote
//! definitions are pulled out into a separate buffer so templates can place
//! them, and fenced code blocks are highlighted line by line.

pub mod highlight;

use crate::html::{escape, make_tag, strip_html, strip_single_paragraph, unescape};
use crate::slug::slugify;
use highlight::CodeBlock;
use once_cell::sync::Lazy;
use pulldown_cmark::{html, CodeBlockKind, CowStr, Event, Options, Parser, Tag, TagEnd};
use regex::Regex;
use std::collections::HashMap;

/// Tags kept when building table-of-contents text
pub const TOC_ALLOWED_TAGS: &[&str] = &[
    "sup", "sub", "em", "strong", "b", "i", "code", "del", "add", "mark",
];

/// Elements removed entirely when producing plain text
pub const PLAINTEXT_REMOVE_ELEMENTS: &[&str] = &["del", "s"];

/// One table-of-contents entry: heading level and link markup
pub type TocEntry = (u32, String);

/// Rendering options, the CSS hooks and link bases templates pass in
#[derive(Debug, Clone)]
pub struct MarkdownArgs {
    /// Base URL for footnote links (empty for same-page anchors)
    pub footnotes_link: String,
    pub footnotes_class: Option<String>,
    /// Symbol for the link back from a footnote to its reference
    pub footnotes_return: String,
    /// Base URL for heading anchors
    pub toc_link: String,
    pub heading_link_class: Option<String>,
    /// Layout of a heading; `{link}` is the opening anchor tag, `{text}` the heading
    pub heading_template: String,
    pub code_highlight: bool,
    /// Base URL for code line-number links; `None` disables them
    pub code_number_links: Option<String>,
    pub smartquotes: bool,
}

impl Default for MarkdownArgs {
    fn default() -> Self {
        Self {
            footnotes_link: String::new(),
            footnotes_class: None,
            footnotes_return: String::from("\u{21a9}"),
            toc_link: String::new(),
            heading_link_class: None,
            heading_template: String::from("{link}</a>{text}"),
            code_highlight: true,
            code_number_links: None,
            smartquotes: true,
        }
    }
}

impl MarkdownArgs {
    fn options(&self) -> Options {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_FOOTNOTES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);
        options.insert(Options::ENABLE_HEADING_ATTRIBUTES);
        if self.smartquotes {
            options.insert(Options::ENABLE_SMART_PUNCTUATION);
        }
        options
    }
}

/// Running counts of numbered items, so a second fragment continues numbering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemCounter {
    pub toc: usize,
    pub footnote: usize,
    pub code_blocks: usize,
}

/// Count headings, referenced footnotes and code blocks without rendering
pub fn get_counters(text: &str, args: &MarkdownArgs) -> ItemCounter {
    let events: Vec<Event> = Parser::new_ext(text, args.options()).collect();
    let referenced = footnote_numbers(&events);

    let mut counter = ItemCounter::default();
    for event in &events {
        match event {
            Event::Start(Tag::Heading { .. }) => counter.toc += 1,
            Event::Start(Tag::CodeBlock(_)) => counter.code_blocks += 1,
            Event::Start(Tag::FootnoteDefinition(label)) if referenced.contains_key(label.as_ref()) => {
                counter.footnote += 1
            }
            _ => {}
        }
    }
    counter
}

/// Convert markdown to HTML
///
/// Heading entries are appended to `toc`, footnote `<li>` items to
/// `footnotes`, and `counter` is advanced past everything rendered.
pub fn to_html(
    text: &str,
    args: &MarkdownArgs,
    counter: &mut ItemCounter,
    entry_id: Option<i64>,
    toc: &mut Vec<TocEntry>,
    footnotes: &mut Vec<String>,
) -> String {
    tracing::debug!("to_html entry={:?} counter={:?}", entry_id, counter);

    let events: Vec<Event> = Parser::new_ext(text, args.options()).collect();
    let numbers = footnote_numbers(&events);

    let mut renderer = Renderer {
        args,
        entry_id: entry_id.unwrap_or(0),
        footnote_offset: counter.footnote,
        numbers,
        counter,
        toc,
        definitions: HashMap::new(),
    };

    let events = renderer.transform(events);
    let mut html_output = String::new();
    html::push_html(&mut html_output, events.into_iter());

    renderer.flush_footnotes(footnotes);
    html_output
}

/// Render footnote `<li>` items as an ordered list
pub fn footnotes_to_html(footnotes: &[String], class: Option<&str>) -> String {
    if footnotes.is_empty() {
        return String::new();
    }
    format!(
        "{}{}</ol>",
        make_tag("ol", &[("class", class)]),
        footnotes.concat()
    )
}

/// Assign local numbers to footnote labels in order of first reference
fn footnote_numbers(events: &[Event]) -> HashMap<String, usize> {
    let mut numbers = HashMap::new();
    for event in events {
        if let Event::FootnoteReference(label) = event {
            let next = numbers.len() + 1;
            numbers.entry(label.to_string()).or_insert(next);
        }
    }
    numbers
}

struct Renderer<'r> {
    args: &'r MarkdownArgs,
    entry_id: i64,
    footnote_offset: usize,
    numbers: HashMap<String, usize>,
    counter: &'r mut ItemCounter,
    toc: &'r mut Vec<TocEntry>,
    /// Rendered footnote bodies keyed by global footnote number
    definitions: HashMap<usize, String>,
}

impl Renderer<'_> {
    fn transform<'a>(&mut self, events: Vec<Event<'a>>) -> Vec<Event<'a>> {
        let mut result = Vec::with_capacity(events.len());
        let mut iter = events.into_iter();

        while let Some(event) = iter.next() {
            match event {
                Event::Start(Tag::FootnoteDefinition(label)) => {
                    let inner = collect_until(&mut iter, |e| {
                        matches!(e, Event::End(TagEnd::FootnoteDefinition))
                    });
                    self.footnote_def(&label, inner);
                }
                Event::FootnoteReference(label) => {
                    result.push(self.footnote_ref(&label));
                }
                Event::Start(Tag::Heading { level, .. }) => {
                    let inner = collect_until(&mut iter, |e| matches!(e, Event::End(TagEnd::Heading(_))));
                    let inner = self.transform(inner);
                    result.push(self.heading(level as u32, inner));
                }
                Event::Start(Tag::CodeBlock(kind)) => {
                    let lang = match &kind {
                        CodeBlockKind::Fenced(info) => info.split_whitespace().next().unwrap_or("").to_string(),
                        CodeBlockKind::Indented => String::new(),
                    };
                    let mut code = String::new();
                    for inner in collect_until(&mut iter, |e| matches!(e, Event::End(TagEnd::CodeBlock))) {
                        if let Event::Text(text) = inner {
                            code.push_str(&text);
                        }
                    }
                    result.push(self.blockcode(&code, &lang));
                }
                other => result.push(other),
            }
        }

        result
    }

    fn footnote_num(&self, local: usize) -> usize {
        local + self.footnote_offset
    }

    fn footnote_id(&self, num: usize, anchor: &str) -> String {
        format!("{}_e{}_fn{}", anchor, self.entry_id, num)
    }

    fn footnote_url(&self, num: usize, anchor: &str) -> String {
        join_fragment(&self.args.footnotes_link, &self.footnote_id(num, anchor))
    }

    fn footnote_ref<'a>(&self, label: &str) -> Event<'a> {
        let Some(local) = self.numbers.get(label).copied() else {
            return Event::Text(CowStr::from(format!("[^{}]", label)));
        };
        let num = self.footnote_num(local);

        let html = format!(
            "{}{}{}</a></sup>",
            make_tag(
                "sup",
                &[
                    ("id", Some(&self.footnote_id(num, "r"))),
                    ("class", self.args.footnotes_class.as_deref()),
                ],
            ),
            make_tag(
                "a",
                &[
                    ("href", Some(&self.footnote_url(num, "d"))),
                    ("rel", Some("footnote")),
                ],
            ),
            num
        );
        Event::InlineHtml(CowStr::from(html))
    }

    fn footnote_def(&mut self, label: &str, inner: Vec<Event<'_>>) {
        let Some(local) = self.numbers.get(label).copied() else {
            tracing::debug!("Dropping unreferenced footnote {}", label);
            return;
        };
        let num = self.footnote_num(local);

        let inner = self.transform(inner);
        let mut content = String::new();
        html::push_html(&mut content, inner.into_iter());

        // The return link goes just before the end of the first block
        let (before, partition, after) = match content.find("</p>") {
            Some(pos) => (&content[..pos], "</p>", &content[pos + 4..]),
            None => (content.as_str(), "", ""),
        };

        let text = format!(
            "{}{}&nbsp;{}{}</a>{}{}</li>",
            make_tag("li", &[("id", Some(&self.footnote_id(num, "d")))]),
            before,
            make_tag(
                "a",
                &[
                    ("href", Some(&self.footnote_url(num, "r"))),
                    ("rev", Some("footnote")),
                ],
            ),
            self.args.footnotes_return,
            partition,
            after.trim_end()
        );
        self.definitions.insert(num, text);
    }

    fn flush_footnotes(&mut self, footnotes: &mut Vec<String>) {
        let mut numbered: Vec<_> = self.definitions.drain().collect();
        numbered.sort_by_key(|(num, _)| *num);
        self.counter.footnote += numbered.len();
        footnotes.extend(numbered.into_iter().map(|(_, text)| text));
    }

    fn heading<'a>(&mut self, level: u32, inner: Vec<Event<'_>>) -> Event<'a> {
        self.counter.toc += 1;

        let mut content = String::new();
        html::push_html(&mut content, inner.into_iter());

        let plain = unescape(&strip_html(&content, &[], PLAINTEXT_REMOVE_ELEMENTS));
        let hid = format!(
            "{}_h{}_{}_{}",
            self.entry_id,
            level,
            self.counter.toc,
            slugify(&plain)
        );

        let atag = make_tag(
            "a",
            &[
                ("href", Some(&join_fragment(&self.args.toc_link, &hid))),
                ("class", self.args.heading_link_class.as_deref()),
            ],
        );

        tracing::debug!("append toc: {} {}", level, content);
        self.toc.push((
            level,
            format!("{}{}</a>", atag, strip_html(&content, TOC_ALLOWED_TAGS, &[])),
        ));

        let body = self
            .args
            .heading_template
            .replace("{link}", &atag)
            .replace("{text}", &content);

        Event::Html(CowStr::from(format!(
            "{}{}</h{}>\n",
            make_tag(&format!("h{}", level), &[("id", Some(&hid))]),
            body,
            level
        )))
    }

    fn blockcode<'a>(&mut self, text: &str, lang: &str) -> Event<'a> {
        tracing::debug!("blockcode lang={}", lang);
        self.counter.code_blocks += 1;

        let mut out = String::from("<figure class=\"blockcode\">");

        let mut code = text;
        if let Some(rest) = text.strip_prefix('!') {
            let (caption, remainder) = rest.split_once('\n').unwrap_or((rest, ""));
            out.push_str("<figcaption>");
            out.push_str(&render_inline(caption, self.args));
            out.push_str("</figcaption>");
            code = remainder;
        } else if let Some(rest) = text.strip_prefix("\\!") {
            // An escaped leading ! is literal code
            code = &text[1..];
            debug_assert!(rest.len() + 2 == text.len());
        }

        let lang_attr = if lang.is_empty() { None } else { Some(lang) };
        out.push_str(&make_tag(
            "pre",
            &[
                ("class", lang_attr.map(|_| "highlight")),
                ("data-language", lang_attr),
            ],
        ));

        let block = CodeBlock {
            lang,
            line_id_prefix: format!("e{}cb{}", self.entry_id, self.counter.code_blocks),
            link_base: self.args.code_number_links.as_deref(),
            highlight: self.args.code_highlight,
        };
        out.push_str(&block.render_lines(code));
        out.push_str("</pre></figure>\n");

        Event::Html(CowStr::from(out))
    }
}

/// Pull events up to (and consuming) the first one matching `is_end`
fn collect_until<'a, I, F>(iter: &mut I, is_end: F) -> Vec<Event<'a>>
where
    I: Iterator<Item = Event<'a>>,
    F: Fn(&Event<'a>) -> bool,
{
    let mut inner = Vec::new();
    for event in iter.by_ref() {
        if is_end(&event) {
            break;
        }
        inner.push(event);
    }
    inner
}

/// Replace any fragment on `base` with `#fragment`
fn join_fragment(base: &str, fragment: &str) -> String {
    let base = base.split('#').next().unwrap_or("");
    format!("{}#{}", base, fragment)
}

/// Render a short piece of markdown without its wrapping paragraph
fn render_inline(text: &str, args: &MarkdownArgs) -> String {
    let mut out = String::new();
    html::push_html(&mut out, Parser::new_ext(text, args.options()));
    strip_single_paragraph(&out)
}

static TITLE_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([0-9. ]*)(.*)$").unwrap());

/// Render a title, allowing only inline markdown
///
/// A leading run of digits, dots and spaces is kept literally so titles like
/// "1. Introduction" are not turned into lists. With `markup` off, the
/// result is plain text.
///
/// ```
/// use publ_core::markdown::render_title;
///
/// assert_eq!(render_title("Hello *world*", true, false), "Hello <em>world</em>");
/// assert_eq!(render_title("Hello *world*", false, false), "Hello world");
/// assert_eq!(render_title("1. First", false, false), "1. First");
/// ```
pub fn render_title(text: &str, markup: bool, smartquotes: bool) -> String {
    let (prefix, rest) = match TITLE_PREFIX.captures(text) {
        Some(caps) => (
            caps.get(1).map_or("", |m| m.as_str()).to_string(),
            caps.get(2).map_or("", |m| m.as_str()).to_string(),
        ),
        None => (String::new(), text.to_string()),
    };

    let args = MarkdownArgs {
        smartquotes,
        ..MarkdownArgs::default()
    };

    let events = Parser::new_ext(&rest, args.options()).filter_map(|event| match event {
        Event::Start(Tag::Paragraph)
        | Event::End(TagEnd::Paragraph)
        | Event::Start(Tag::Heading { .. })
        | Event::End(TagEnd::Heading(_))
        | Event::Start(Tag::List(_))
        | Event::End(TagEnd::List(_))
        | Event::End(TagEnd::Item) => None,
        Event::Start(Tag::Item) => Some(Event::Text(CowStr::Borrowed("* "))),
        Event::SoftBreak | Event::HardBreak => Some(Event::Text(CowStr::Borrowed(" "))),
        other => Some(other),
    });

    let mut rendered = String::new();
    html::push_html(&mut rendered, events);
    let rendered = format!("{}{}", escape(&prefix), rendered.trim());

    if markup {
        rendered
    } else {
        unescape(&strip_html(&rendered, &[], PLAINTEXT_REMOVE_ELEMENTS))
    }
}

/// Convert a table-of-contents buffer into nested `<ol>` lists
///
/// Levels are normalized so the shallowest heading present is level 1.
pub fn toc_to_html(toc: &[TocEntry], max_level: Option<u32>) -> String {
    let Some(min_level) = toc.iter().map(|(level, _)| *level).min() else {
        return String::new();
    };

    let mut out = String::new();
    let mut cur_level = 0u32;

    for (level, text) in toc {
        let level = level - min_level + 1;
        if max_level.map_or(true, |max| level <= max) {
            if level > cur_level {
                out.push_str(&"<ol><li>".repeat((level - cur_level) as usize));
            } else {
                out.push_str(&"</li></ol>".repeat((cur_level - level) as usize));
                out.push_str("</li><li>");
            }
            out.push_str(text);
            cur_level = level;
        }
    }

    out.push_str(&"</li></ol>".repeat(cur_level as usize));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(text: &str, args: &MarkdownArgs, eid: i64) -> (String, Vec<TocEntry>, Vec<String>, ItemCounter) {
        let mut counter = ItemCounter::default();
        let mut toc = Vec::new();
        let mut footnotes = Vec::new();
        let html = to_html(text, args, &mut counter, Some(eid), &mut toc, &mut footnotes);
        (html, toc, footnotes, counter)
    }

    #[test]
    fn test_basic_markdown() {
        let (html, _, _, _) = render("This is a **test**.", &MarkdownArgs::default(), 1);
        assert_eq!(html.trim(), "<p>This is a <strong>test</strong>.</p>");
    }

    #[test]
    fn test_tables() {
        let md = "| Header 1 | Header 2 |\n|----------|----------|\n| Cell 1   | Cell 2   |\n";
        let (html, _, _, _) = render(md, &MarkdownArgs::default(), 1);
        assert!(html.contains("<table>"));
        assert!(html.contains("<th>Header 1</th>"));
    }

    #[test]
    fn test_heading_anchors() {
        let args = MarkdownArgs {
            heading_link_class: Some("toc-link".into()),
            toc_link: "/blog/5-post".into(),
            ..MarkdownArgs::default()
        };
        let (html, toc, _, counter) = render("# First *one*\n\n## Second\n", &args, 5);

        assert!(html.contains(
            r##"<h1 id="5_h1_1_first-one"><a href="/blog/5-post#5_h1_1_first-one" class="toc-link"></a>First <em>one</em></h1>"##
        ));
        assert!(html.contains(r#"<h2 id="5_h2_2_second">"#));
        assert_eq!(toc.len(), 2);
        assert_eq!(
            toc[0],
            (1, r##"<a href="/blog/5-post#5_h1_1_first-one" class="toc-link">First <em>one</em></a>"##.to_string())
        );
        assert_eq!(counter.toc, 2);
    }

    #[test]
    fn test_footnotes_are_extracted() {
        let md = "Text[^a] and more[^b].\n\n[^b]: Second note.\n[^a]: First note.\n";
        let args = MarkdownArgs {
            footnotes_class: Some("fn".into()),
            ..MarkdownArgs::default()
        };
        let (html, _, footnotes, counter) = render(md, &args, 3);

        assert!(html.contains(
            r##"<sup id="r_e3_fn1" class="fn"><a href="#d_e3_fn1" rel="footnote">1</a></sup>"##
        ));
        assert!(html.contains(r##"<a href="#d_e3_fn2" rel="footnote">2</a>"##));
        assert!(!html.contains("First note"));

        assert_eq!(footnotes.len(), 2);
        assert_eq!(
            footnotes[0],
            "<li id=\"d_e3_fn1\"><p>First note.&nbsp;<a href=\"#r_e3_fn1\" rev=\"footnote\">\u{21a9}</a></p></li>"
        );
        assert!(footnotes[1].starts_with("<li id=\"d_e3_fn2\"><p>Second note."));
        assert_eq!(counter.footnote, 2);
    }

    #[test]
    fn test_footnote_numbering_continues_from_counter() {
        let body = "Body[^x].\n\n[^x]: In body.\n";
        let more = "More[^y].\n\n[^y]: In more.\n";
        let args = MarkdownArgs::default();

        let mut counter = get_counters(body, &args);
        assert_eq!(counter.footnote, 1);

        let mut toc = Vec::new();
        let mut footnotes = Vec::new();
        let html = to_html(more, &args, &mut counter, Some(9), &mut toc, &mut footnotes);
        assert!(html.contains(r##"href="#d_e9_fn2""##));
        assert!(footnotes[0].starts_with("<li id=\"d_e9_fn2\">"));
    }

    #[test]
    fn test_code_block_with_caption() {
        let md = "```python\n!A *caption*\nprint('hi')\n```\n";
        let args = MarkdownArgs {
            code_highlight: false,
            ..MarkdownArgs::default()
        };
        let (html, _, _, counter) = render(md, &args, 2);

        assert!(html.starts_with("<figure class=\"blockcode\"><figcaption>A <em>caption</em></figcaption>"));
        assert!(html.contains(r#"<pre class="highlight" data-language="python">"#));
        assert!(html.contains("print(&#39;hi&#39;)"));
        assert_eq!(counter.code_blocks, 1);
    }

    #[test]
    fn test_code_block_escaped_bang() {
        let md = "```\n\\!important\n```\n";
        let args = MarkdownArgs {
            code_highlight: false,
            ..MarkdownArgs::default()
        };
        let (html, _, _, _) = render(md, &args, 2);
        assert!(!html.contains("figcaption"));
        assert!(html.contains("<pre><span class=\"line\"><span class=\"line-content\">!important</span></span>"));
    }

    #[test]
    fn test_highlighted_code_lines() {
        let md = "```rust\nfn main() {}\n```\n";
        let args = MarkdownArgs {
            code_number_links: Some("/7-x".into()),
            ..MarkdownArgs::default()
        };
        let (html, _, _, _) = render(md, &args, 7);
        assert!(html.contains(r#"id="e7cb1L1""#));
        assert!(html.contains(r##"<a class="line-number" href="/7-x#e7cb1L1"></a>"##));
    }

    #[test]
    fn test_get_counters() {
        let md = "# A\n\n## B\n\n```\nx\n```\n\nRef[^1]\n\n[^1]: note\n\n[^unused]: nothing\n";
        let counter = get_counters(md, &MarkdownArgs::default());
        assert_eq!(
            counter,
            ItemCounter {
                toc: 2,
                footnote: 1,
                code_blocks: 1
            }
        );
    }

    #[test]
    fn test_render_title() {
        assert_eq!(render_title("It's *here*", true, true), "It\u{2019}s <em>here</em>");
        assert_eq!(render_title("Gone ~~away~~ now", false, false), "Gone  now");
        assert_eq!(render_title("1984. A year", true, false), "1984. A year");
        assert_eq!(render_title("* starred", true, false), "* starred");
        assert_eq!(render_title("Fish & chips", false, false), "Fish & chips");
        assert_eq!(render_title("Fish & chips", true, false), "Fish &amp; chips");
    }

    #[test]
    fn test_toc_to_html() {
        let toc = vec![
            (2, "A".to_string()),
            (3, "A.1".to_string()),
            (2, "B".to_string()),
        ];
        insta::assert_snapshot!(
            toc_to_html(&toc, None),
            @"<ol><li>A<ol><li>A.1</li></ol></li><li>B</li></ol>"
        );
        assert_eq!(toc_to_html(&toc, Some(1)), "<ol><li>A</li><li>B</li></ol>");
        assert_eq!(toc_to_html(&[], None), "");
    }

    #[test]
    fn test_footnotes_to_html() {
        let items = vec!["<li>a</li>".to_string()];
        assert_eq!(
            footnotes_to_html(&items, Some("notes")),
            "<ol class=\"notes\"><li>a</li></ol>"
        );
        assert_eq!(footnotes_to_html(&[], None), "");
    }

    #[test]
    fn test_rendered_entry_layout() {
        let md = "Intro with a note[^n].\n\n## Details\n\nSome text.\n\n[^n]: The note.\n";
        let (html, _, footnotes, _) = render(md, &MarkdownArgs::default(), 4);
        assert_eq!(
            html,
            "<p>Intro with a note<sup id=\"r_e4_fn1\"><a href=\"#d_e4_fn1\" rel=\"footnote\">1</a></sup>.</p>\n\
             <h2 id=\"4_h2_1_details\"><a href=\"#4_h2_1_details\"></a>Details</h2>\n\
             <p>Some text.</p>\n"
        );
        insta::assert_snapshot!(
            footnotes.join(""),
            @r##"<li id="d_e4_fn1"><p>The note.&nbsp;<a href="#r_e4_fn1" rev="footnote">↩</a></p></li>"##
        );
    }
}

//! Fenced code block rendering with syntect highlighting and line scaffolding.

use crate::html::{escape, make_tag};
use std::sync::OnceLock;
use syntect::easy::HighlightLines;
use syntect::highlighting::{Theme, ThemeSet};
use syntect::html::{styled_line_to_highlighted_html, IncludeBackground};
use syntect::parsing::{SyntaxReference, SyntaxSet};
use syntect::util::LinesWithEndings;

static SYNTAX_SET: OnceLock<SyntaxSet> = OnceLock::new();
static THEME: OnceLock<Theme> = OnceLock::new();

fn syntax_set() -> &'static SyntaxSet {
    SYNTAX_SET.get_or_init(SyntaxSet::load_defaults_newlines)
}

fn theme() -> &'static Theme {
    THEME.get_or_init(|| {
        let mut theme_set = ThemeSet::load_defaults();
        theme_set
            .themes
            .remove("InspiredGitHub")
            .or_else(|| theme_set.themes.remove("base16-ocean.light"))
            .unwrap_or_default()
    })
}

fn find_syntax(lang: &str) -> &'static SyntaxReference {
    let ss = syntax_set();
    ss.find_syntax_by_token(lang)
        .or_else(|| ss.find_syntax_by_extension(lang))
        .unwrap_or_else(|| ss.find_syntax_plain_text())
}

/// Settings for one code block
pub struct CodeBlock<'a> {
    pub lang: &'a str,
    /// Prefix for each line's element id, e.g. `e12cb3`
    pub line_id_prefix: String,
    /// Base URL for line-number links; `None` disables them
    pub link_base: Option<&'a str>,
    pub highlight: bool,
}

impl CodeBlock<'_> {
    /// Render the lines of `code` as `<span class="line">` elements
    pub fn render_lines(&self, code: &str) -> String {
        if !self.highlight {
            return code
                .lines()
                .map(|line| {
                    format!(
                        "<span class=\"line\"><span class=\"line-content\">{}</span></span>",
                        escape(line)
                    )
                })
                .collect::<Vec<_>>()
                .join("\n");
        }

        let mut highlighter = HighlightLines::new(find_syntax(self.lang), theme());
        let mut out = String::new();

        for (idx, line) in LinesWithEndings::from(code).enumerate() {
            let content = match highlighter.highlight_line(line, syntax_set()) {
                Ok(ranges) => {
                    let ranges: Vec<_> = ranges
                        .into_iter()
                        .map(|(style, text)| (style, text.trim_end_matches(['\n', '\r'])))
                        .collect();
                    styled_line_to_highlighted_html(&ranges, IncludeBackground::No)
                        .unwrap_or_else(|_| escape(line))
                }
                Err(err) => {
                    tracing::debug!("Highlighting failed for {}: {}", self.lang, err);
                    escape(line)
                }
            };
            out.push_str(&self.wrap_line(idx + 1, &content));
        }

        out
    }

    fn wrap_line(&self, number: usize, content: &str) -> String {
        let line_id = format!("{}L{}", self.line_id_prefix, number);
        let number_link = match self.link_base {
            Some(base) => format!(
                "{}</a>",
                make_tag(
                    "a",
                    &[
                        ("class", Some("line-number")),
                        ("href", Some(&format!("{}#{}", base, line_id))),
                    ],
                )
            ),
            None => String::new(),
        };

        format!(
            "{}{}{}{}</span></span>\n",
            make_tag("span", &[("class", Some("line")), ("id", Some(&line_id))]),
            number_link,
            make_tag("span", &[("class", Some("line-content"))]),
            content.replace("  ", "&nbsp; ").trim_end()
        )
    }
}

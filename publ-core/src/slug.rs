//! Slug generation and title guessing.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use unicode_segmentation::UnicodeSegmentation;

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9]+").unwrap());
static TITLE_SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ _-]+").unwrap());
static HYPHEN_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"-+").unwrap());

/// Maximum length of an anchor slug produced by [`slugify`]
pub const ANCHOR_SLUG_MAX: usize = 32;

/// Convert an entry title into the slug used in entry URLs
///
/// Runs of anything other than ASCII letters and digits collapse to a single
/// hyphen; case is preserved.
///
/// ```
/// use publ_core::slug::make_slug;
///
/// assert_eq!(make_slug("  Hello, World!  "), "Hello-World-");
/// ```
pub fn make_slug(title: &str) -> String {
    NON_ALNUM.replace_all(title.trim(), "-").into_owned()
}

/// Guess a display title from a file name
///
/// ```
/// use publ_core::slug::guess_title;
///
/// assert_eq!(guess_title("my_first-post.md"), "My First Post");
/// ```
pub fn guess_title(basename: &str) -> String {
    let stem = Path::new(basename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(basename);

    let spaced = TITLE_SEPARATORS.replace_all(stem, " ");
    title_case(&spaced)
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for c in text.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

/// Convert a string to a lowercase, URL-safe anchor slug
///
/// Rules:
/// - Lowercase
/// - Replace whitespace with hyphens
/// - Remove special characters (except hyphens)
/// - Collapse multiple hyphens
/// - Trim leading/trailing hyphens
/// - At most [`ANCHOR_SLUG_MAX`] characters, cut at a hyphen where possible
///
/// ```
/// use publ_core::slug::slugify;
///
/// assert_eq!(slugify("Hello World"), "hello-world");
/// assert_eq!(slugify("Rust & Safety"), "rust-safety");
/// ```
pub fn slugify(input: &str) -> String {
    let lowercased = input.to_lowercase();

    let with_hyphens = lowercased
        .graphemes(true)
        .map(|g| match g {
            " " | "_" | "\t" | "\n" => "-",
            _ => g,
        })
        .collect::<String>();

    let cleaned = with_hyphens
        .graphemes(true)
        .filter(|g| {
            g.chars()
                .next()
                .map(|c| c.is_ascii_alphanumeric() || c == '-' || c.is_alphabetic())
                .unwrap_or(false)
        })
        .collect::<String>();

    let collapsed = HYPHEN_RUNS.replace_all(&cleaned, "-");
    truncate_slug(collapsed.trim_matches('-'), ANCHOR_SLUG_MAX)
}

fn truncate_slug(slug: &str, max: usize) -> String {
    if slug.chars().count() <= max {
        return slug.to_string();
    }

    let cut: String = slug.chars().take(max).collect();
    match cut.rfind('-') {
        Some(pos) if pos > 0 => cut[..pos].to_string(),
        _ => cut,
    }
}

//! Small HTML helpers: escaping, tag construction and tag stripping.

/// Escape text for use in HTML content or attribute values
pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Decode the character references produced by markdown rendering
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        match tail.find(';').filter(|end| *end <= 10) {
            Some(end) => {
                let entity = &tail[1..end];
                match decode_entity(entity) {
                    Some(c) => out.push(c),
                    None => out.push_str(&tail[..=end]),
                }
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let code = if let Some(hex) = entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                entity.strip_prefix('#')?.parse().ok()?
            };
            char::from_u32(code)
        }
    }
}

/// Build an opening tag; attributes whose value is `None` are omitted
///
/// ```
/// use publ_core::html::make_tag;
///
/// assert_eq!(
///     make_tag("a", &[("href", Some("#x")), ("class", None)]),
///     r##"<a href="#x">"##
/// );
/// ```
pub fn make_tag(name: &str, attrs: &[(&str, Option<&str>)]) -> String {
    let mut tag = format!("<{}", name);
    for (key, value) in attrs {
        if let Some(value) = value {
            tag.push_str(&format!(" {}=\"{}\"", key, escape(value)));
        }
    }
    tag.push('>');
    tag
}

/// Remove HTML tags from a fragment
///
/// Tags named in `allowed_tags` are kept verbatim. Elements named in
/// `remove_elements` are dropped along with their contents. Character
/// references are left as they are.
pub fn strip_html(html: &str, allowed_tags: &[&str], remove_elements: &[&str]) -> String {
    let mut out = String::with_capacity(html.len());
    let mut removing = 0usize;
    let mut rest = html;

    while let Some(lt) = rest.find('<') {
        if removing == 0 {
            out.push_str(&rest[..lt]);
        }
        let tail = &rest[lt..];
        let Some(gt) = tail.find('>') else {
            if removing == 0 {
                out.push_str(tail);
            }
            return out;
        };

        let tag = &tail[..=gt];
        let (name, closing) = tag_name(tag);
        let self_closing = tag.ends_with("/>");

        if remove_elements.iter().any(|r| r.eq_ignore_ascii_case(&name)) {
            if closing {
                removing = removing.saturating_sub(1);
            } else if !self_closing {
                removing += 1;
            }
        } else if removing == 0 && allowed_tags.iter().any(|a| a.eq_ignore_ascii_case(&name)) {
            out.push_str(tag);
        }

        rest = &tail[gt + 1..];
    }

    if removing == 0 {
        out.push_str(rest);
    }
    out
}

fn tag_name(tag: &str) -> (String, bool) {
    let inner = tag.trim_start_matches('<');
    let (closing, inner) = match inner.strip_prefix('/') {
        Some(stripped) => (true, stripped),
        None => (false, inner),
    };
    let name: String = inner
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    (name, closing)
}

/// Remove a single wrapping `<p>…</p>` from rendered markdown
pub fn strip_single_paragraph(html: &str) -> String {
    let trimmed = html.trim();
    match trimmed
        .strip_prefix("<p>")
        .and_then(|s| s.strip_suffix("</p>"))
    {
        Some(inner) if !inner.contains("<p>") => inner.to_string(),
        _ => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_roundtrip() {
        let raw = r#"<a href="x">Tom & 'Jerry'</a>"#;
        assert_eq!(unescape(&escape(raw)), raw);
    }

    #[test]
    fn test_unescape_numeric_and_unknown() {
        assert_eq!(unescape("&#8220;hi&#x201d;"), "\u{201c}hi\u{201d}");
        assert_eq!(unescape("AT&T &bogus; &"), "AT&T &bogus; &");
    }

    #[test]
    fn test_strip_html() {
        let html = "<p>Some <em>emphasis</em> and <del>gone</del> <code>x</code></p>";
        assert_eq!(strip_html(html, &[], &[]), "Some emphasis and gone x");
        assert_eq!(strip_html(html, &[], &["del"]), "Some emphasis and  x");
        assert_eq!(
            strip_html(html, &["em", "code"], &["del"]),
            "Some <em>emphasis</em> and  <code>x</code>"
        );
    }

    #[test]
    fn test_strip_single_paragraph() {
        assert_eq!(strip_single_paragraph("<p>caption</p>\n"), "caption");
        assert_eq!(
            strip_single_paragraph("<p>a</p><p>b</p>"),
            "<p>a</p><p>b</p>"
        );
    }
}

//! Social-preview card extraction (OpenGraph/Twitter style).

use crate::html::{strip_html, unescape};
use pulldown_cmark::{html, Event, Options, Parser, Tag, TagEnd};
use serde::Serialize;

/// Data pulled out of an entry for a preview card
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CardData {
    pub description: Option<String>,
    pub images: Vec<String>,
}

/// Extract card data from entry text
///
/// For markdown, the first paragraph's text becomes the description and up
/// to `count` image URLs are collected. For HTML, the description is the
/// text up to the end of the first paragraph.
pub fn extract_card(text: &str, is_markdown: bool, count: usize) -> CardData {
    if is_markdown {
        extract_markdown(text, count)
    } else {
        CardData {
            description: extract_html_description(text),
            images: Vec::new(),
        }
    }
}

fn extract_markdown(text: &str, count: usize) -> CardData {
    let mut card = CardData::default();
    let mut paragraph: Option<Vec<Event>> = None;
    let mut in_image = false;

    let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_FOOTNOTES;
    for event in Parser::new_ext(text, options) {
        match event {
            Event::Start(Tag::Image { dest_url, .. }) => {
                if card.images.len() < count {
                    card.images.push(dest_url.to_string());
                }
                in_image = true;
            }
            Event::End(TagEnd::Image) => in_image = false,
            _ if in_image => {}
            Event::Start(Tag::Paragraph) if card.description.is_none() => {
                paragraph = Some(Vec::new());
            }
            Event::End(TagEnd::Paragraph) => {
                if let Some(events) = paragraph.take() {
                    let mut rendered = String::new();
                    html::push_html(&mut rendered, events.into_iter());
                    let description = unescape(strip_html(&rendered, &[], &[]).trim());
                    if !description.is_empty() {
                        card.description = Some(description);
                    }
                }
            }
            // Link text is kept, the link itself dropped
            Event::Start(Tag::Link { .. }) | Event::End(TagEnd::Link) => {}
            Event::FootnoteReference(_) => {}
            other => {
                if let Some(events) = paragraph.as_mut() {
                    events.push(other);
                }
            }
        }
    }

    card
}

fn extract_html_description(text: &str) -> Option<String> {
    let mut description = String::new();
    let mut consume = true;
    let mut rest = text;

    while let Some(lt) = rest.find('<') {
        if consume {
            description.push_str(&rest[..lt]);
        }
        let tail = &rest[lt..];
        let Some(gt) = tail.find('>') else {
            break;
        };
        let tag = tail[1..gt].trim().to_ascii_lowercase();
        let name: String = tag
            .trim_start_matches('/')
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect();

        if name == "p" {
            // Either the first paragraph ended, or text before it already served
            if tag.starts_with('/') || !description.trim().is_empty() {
                consume = false;
            }
        }
        rest = &tail[gt + 1..];
    }
    if consume {
        description.push_str(rest);
    }

    let description = unescape(description.trim());
    (!description.is_empty()).then_some(description)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markdown_card() {
        let text = "![cover](cover.jpg)\n\nFirst [linked](http://x) *para*.\n\n![a](a.png) ![b](b.png)\n\nSecond para.\n";
        let card = extract_card(text, true, 2);
        assert_eq!(card.description.as_deref(), Some("First linked para."));
        assert_eq!(card.images, vec!["cover.jpg", "a.png"]);
    }

    #[test]
    fn test_markdown_card_without_text() {
        let card = extract_card("![only](pic.png)\n", true, 5);
        assert_eq!(card.description, None);
        assert_eq!(card.images, vec!["pic.png"]);
    }

    #[test]
    fn test_html_card() {
        let card = extract_card("<p>Hello &amp; <b>welcome</b></p><p>More</p>", false, 1);
        assert_eq!(card.description.as_deref(), Some("Hello & welcome"));
        assert!(card.images.is_empty());
    }

    #[test]
    fn test_html_card_leading_text() {
        let card = extract_card("Leading text\n<p>Para</p>", false, 1);
        assert_eq!(card.description.as_deref(), Some("Leading text"));
    }
}

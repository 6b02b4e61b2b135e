//! Figure citations and image markup in course documents.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// A figure citation such as `图3.12`.
static FIGURE_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"图\d+\.\d+").expect("figure reference pattern is valid"));

/// Image markup pointing into the document's `images/` directory.
static IMAGE_MARKUP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!\[(.*?)\]\((images/.*?)\)").expect("image markup pattern is valid")
});

static LEADING_IMAGE_MARKUP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^!\[.*?\]\(images/.*?\)").expect("leading image pattern is valid")
});

pub fn is_figure_reference(line: &str) -> bool {
    FIGURE_REFERENCE.is_match(line)
}

/// True when the line begins with image markup.
pub fn starts_with_image(line: &str) -> bool {
    LEADING_IMAGE_MARKUP.is_match(line)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Segment {
    Text { text: String },
    Image { alt: String, path: String },
}

/// Split text into plain-text and image segments, in document order.
///
/// Empty text between two adjacent images is omitted.
pub fn split_markup(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut cursor = 0;

    for caps in IMAGE_MARKUP.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() > cursor {
            segments.push(Segment::Text {
                text: text[cursor..whole.start()].to_string(),
            });
        }
        segments.push(Segment::Image {
            alt: caps[1].to_string(),
            path: caps[2].to_string(),
        });
        cursor = whole.end();
    }

    if cursor < text.len() {
        segments.push(Segment::Text {
            text: text[cursor..].to_string(),
        });
    }

    segments
}

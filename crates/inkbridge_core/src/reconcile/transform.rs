//! Content regeneration for created and updated blocks.
//!
//! # Responsibility
//! - Turn recognized text into block content.
//! - Keep user-added decorations that recognized text cannot reproduce.
//!
//! # Invariants
//! - A decoration already present in the previous recognized canonical text is
//!   treated as recognized, not user-added, and is not re-attached.
//! - Without prior content the output is the recognized text unchanged.

use once_cell::sync::Lazy;
use regex::Regex;

static LEADING_MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(TODO|DOING|DONE|LATER|NOW)\s+").expect("valid marker regex")
});
static TRAILING_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*(#[\w/\-]+)\s*$").expect("valid tag regex"));
static TRAILING_REMARK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*(\([^()]*\))\s*$").expect("valid remark regex"));

/// Content and canonical text of a block before this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorContent<'a> {
    pub content: &'a str,
    pub canonical: &'a str,
}

/// Regenerates block content from recognized text.
pub trait ContentTransform {
    fn render(&self, recognized_text: &str, prior: Option<PriorContent<'_>>) -> String;
}

/// Keeps a leading task marker, trailing `#tags` and a trailing
/// parenthesized remark added by the user.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecorationPreservingTransform;

impl ContentTransform for DecorationPreservingTransform {
    fn render(&self, recognized_text: &str, prior: Option<PriorContent<'_>>) -> String {
        let Some(prior) = prior else {
            return recognized_text.to_string();
        };

        let marker = LEADING_MARKER_RE
            .captures(prior.content)
            .and_then(|captures| captures.get(1))
            .map(|found| found.as_str())
            .filter(|marker| !prior.canonical.starts_with(marker))
            .filter(|marker| !recognized_text.trim_start().starts_with(marker));

        let suffixes = user_suffixes(prior.content, prior.canonical);

        let mut rendered = String::new();
        if let Some(marker) = marker {
            rendered.push_str(marker);
            rendered.push(' ');
        }
        rendered.push_str(recognized_text.trim());
        for suffix in suffixes {
            if recognized_text.contains(suffix.as_str()) {
                continue;
            }
            rendered.push(' ');
            rendered.push_str(&suffix);
        }
        rendered
    }
}

/// `content` without a leading task marker, trailing tags and a trailing
/// remark: the part recognition can reproduce.
pub fn strip_decorations(content: &str) -> &str {
    let mut remaining = content.trim();
    if let Some(found) = LEADING_MARKER_RE.find(remaining) {
        remaining = &remaining[found.end()..];
    }
    loop {
        let whole = TRAILING_TAG_RE
            .find(remaining)
            .or_else(|| TRAILING_REMARK_RE.find(remaining));
        match whole {
            Some(whole) if whole.start() > 0 => remaining = &remaining[..whole.start()],
            _ => break,
        }
    }
    remaining.trim()
}

/// Trailing tags and remarks of `content` not present in `canonical`, in
/// their original left-to-right order.
fn user_suffixes(content: &str, canonical: &str) -> Vec<String> {
    let mut remaining = content.trim_end();
    let mut suffixes = Vec::new();
    loop {
        let found = TRAILING_TAG_RE
            .captures(remaining)
            .or_else(|| TRAILING_REMARK_RE.captures(remaining));
        let Some(captures) = found else {
            break;
        };
        let (Some(whole), Some(decoration)) = (captures.get(0), captures.get(1)) else {
            break;
        };
        if whole.start() == 0 || canonical.contains(decoration.as_str()) {
            break;
        }
        suffixes.push(decoration.as_str().to_string());
        remaining = &remaining[..whole.start()];
    }
    suffixes.reverse();
    suffixes
}

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Template invocation every genuine day entry carries.
pub const WOTD_MARKER: &str = "{{wotd";

static DAY_HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"==\s*(\d+)\s*==").expect("valid regex"));

/// One day's block from a monthly archive page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaySection {
    /// Heading digits as written on the page.
    pub label: String,
    /// `None` when the heading digits do not fit a day number.
    pub day: Option<u32>,
    pub content: String,
    pub has_marker: bool,
}

impl DaySection {
    pub fn is_valid(&self) -> bool {
        self.day.is_some() && self.has_marker
    }
}

pub fn is_wotd_entry(content: &str) -> bool {
    content.to_lowercase().contains(WOTD_MARKER)
}

/// Split archive wikitext on `== N ==` headings.
///
/// Text before the first heading is ignored and sections with no content
/// after trimming are dropped. The rest come back in page order, each
/// flagged with whether it carries the day-entry template.
pub fn split_month(text: &str) -> Vec<DaySection> {
    let headings = DAY_HEADING_RE.captures_iter(text).collect::<Vec<_>>();
    let mut sections = Vec::with_capacity(headings.len());

    for (index, captures) in headings.iter().enumerate() {
        let (Some(whole), Some(digits)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let body_end = headings
            .get(index + 1)
            .and_then(|next| next.get(0))
            .map(|next| next.start())
            .unwrap_or(text.len());
        let content = text[whole.end()..body_end].trim();
        if content.is_empty() {
            continue;
        }

        sections.push(DaySection {
            label: digits.as_str().to_string(),
            day: digits.as_str().parse::<u32>().ok(),
            content: content.to_string(),
            has_marker: is_wotd_entry(content),
        });
    }

    sections
}

//! arXiv identifier recognition.
//!
//! Accepts new-style ids (`2101.00001`), old-style ids (`hep-th/9901001`,
//! `math.AG/0601001`), and any URL or free text that contains one.

use regex::Regex;
use std::sync::LazyLock;

/// Matches the first arXiv id in a string. Version suffixes are not captured.
static ARXIV_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\d{4}\.\d{4,5}|[a-z-]+(?:\.[a-z-]+)?/\d{7}").expect("arXiv id regex")
});

/// Extract and lowercase the first arXiv id in `raw`.
pub fn normalize_arxiv_id(raw: &str) -> Option<String> {
    ARXIV_ID_RE.find(raw).map(|m| m.as_str().to_lowercase())
}

//! Atom feed parsing for arXiv API responses.
//!
//! The feed is read with `scraper`'s lenient parser; only the entry elements
//! and their `id`, `title`, `summary`, and `author > name` children are used.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::id::normalize_arxiv_id;

static ENTRY_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("entry").expect("entry selector"));
static ID_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("id").expect("id selector"));
static TITLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("title selector"));
static SUMMARY_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("summary").expect("summary selector"));
static AUTHOR_NAME_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("author name").expect("author selector"));

/// One `<entry>` of an arXiv API response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    /// Normalized arXiv id derived from the entry's `<id>` URL.
    pub id: String,
    pub title: String,
    /// All authors, in feed order.
    pub authors: Vec<String>,
    pub summary: String,
}

/// Parse the entries of an Atom feed.
///
/// A leading entry titled `Error` is the API's error marker and is dropped.
/// Entries whose `<id>` holds no recognizable arXiv id are skipped.
pub fn parse_feed(xml: &str) -> Vec<FeedEntry> {
    let doc = Html::parse_document(xml);
    let mut entries = Vec::new();

    for (i, el) in doc.select(&ENTRY_SEL).enumerate() {
        let title = first_text(&el, &TITLE_SEL).unwrap_or_default();
        if i == 0 && title == "Error" {
            debug!(
                detail = first_text(&el, &SUMMARY_SEL).as_deref().unwrap_or(""),
                "arXiv returned an error entry"
            );
            continue;
        }

        let raw_id = first_text(&el, &ID_SEL).unwrap_or_default();
        let Some(id) = normalize_arxiv_id(&raw_id) else {
            debug!(raw_id = %raw_id, "entry without arXiv id, skipping");
            continue;
        };

        let authors = el
            .select(&AUTHOR_NAME_SEL)
            .map(|n| n.text().collect::<String>().trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();

        entries.push(FeedEntry {
            id,
            title,
            authors,
            summary: first_text(&el, &SUMMARY_SEL).unwrap_or_default(),
        });
    }

    entries
}

fn first_text(el: &ElementRef<'_>, sel: &Selector) -> Option<String> {
    el.select(sel)
        .next()
        .map(|n| n.text().collect::<String>().trim().to_string())
}

//! Discussion rows: CSV loading and grouping by paper.
//!
//! Each CSV data row is one discussion item. Its [`ItemId`] is the 1-based
//! data row number, so ids grow as the sheet is appended to. Deleting a row
//! shifts every later id down; rows are hidden with the hide column instead.

use std::collections::HashMap;
use std::path::PathBuf;

use reqwest::Client;
use serde::Serialize;
use tracing::{debug, instrument};
use url::Url;

use paperdisc_arxiv::normalize_arxiv_id;
use paperdisc_shared::{ItemId, PaperDiscError, Result, SourceConfig};

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Where the discussion CSV lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CsvSource {
    Path(PathBuf),
    Url(Url),
}

impl CsvSource {
    /// Interpret a configured source. `http(s)://` values are URLs, anything
    /// else is a local path.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(PaperDiscError::config("discussion CSV source is empty"));
        }
        if raw.starts_with("http://") || raw.starts_with("https://") {
            let url = Url::parse(raw)
                .map_err(|e| PaperDiscError::config(format!("invalid CSV URL '{raw}': {e}")))?;
            return Ok(Self::Url(url));
        }
        Ok(Self::Path(PathBuf::from(raw)))
    }

    /// Fetch the raw CSV bytes.
    pub async fn read(&self, client: &Client) -> Result<Vec<u8>> {
        match self {
            Self::Path(path) => std::fs::read(path).map_err(|e| PaperDiscError::io(path, e)),
            Self::Url(url) => {
                let response = client
                    .get(url.clone())
                    .send()
                    .await
                    .map_err(|e| PaperDiscError::Network(format!("{url}: {e}")))?;
                let status = response.status();
                if !status.is_success() {
                    return Err(PaperDiscError::Network(format!("{url}: HTTP {status}")));
                }
                let bytes = response.bytes().await.map_err(|e| {
                    PaperDiscError::Network(format!("{url}: failed to read body: {e}"))
                })?;
                Ok(bytes.to_vec())
            }
        }
    }
}

impl std::fmt::Display for CsvSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path(p) => write!(f, "{}", p.display()),
            Self::Url(u) => write!(f, "{u}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// One CSV data row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscussionRow {
    pub id: ItemId,
    pub timestamp: String,
    pub name: String,
    /// Normalized arXiv id; `None` when the cell holds no recognizable id.
    pub arxiv_id: Option<String>,
    pub comments: String,
    pub hidden: bool,
}

impl DiscussionRow {
    /// Rows that end up on the page.
    pub fn is_visible(&self) -> bool {
        !self.hidden && self.arxiv_id.is_some()
    }

    /// Month and day of a `M/D/YYYY ...` timestamp.
    pub fn short_date(&self) -> String {
        self.timestamp
            .split('/')
            .take(2)
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Parse CSV bytes into rows using the configured column names.
///
/// Missing optional columns read as empty cells; a missing arXiv id column is
/// an error because every row would silently disappear.
pub fn parse_rows(data: &[u8], fields: &SourceConfig) -> Result<Vec<DiscussionRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(data);

    let headers = reader
        .headers()
        .map_err(|e| PaperDiscError::parse(format!("invalid CSV header: {e}")))?
        .clone();
    let column = |name: &str| headers.iter().position(|h| h.trim() == name);

    let arxiv_col = column(&fields.arxiv_id_field).ok_or_else(|| {
        PaperDiscError::parse(format!("CSV has no '{}' column", fields.arxiv_id_field))
    })?;
    let date_col = column(&fields.date_field);
    let name_col = column(&fields.name_field);
    let comments_col = column(&fields.comments_field);
    let hide_col = column(&fields.hide_field);

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record
            .map_err(|e| PaperDiscError::parse(format!("invalid CSV row {}: {e}", i + 1)))?;
        let cell = |col: Option<usize>| {
            col.and_then(|c| record.get(c))
                .unwrap_or("")
                .trim()
                .to_string()
        };

        rows.push(DiscussionRow {
            id: ItemId(i as u64 + 1),
            timestamp: cell(date_col),
            name: cell(name_col),
            arxiv_id: normalize_arxiv_id(&cell(Some(arxiv_col))),
            comments: cell(comments_col),
            hidden: cell(hide_col).eq_ignore_ascii_case("true"),
        });
    }

    debug!(rows = rows.len(), "parsed discussion CSV");
    Ok(rows)
}

/// Read and parse the discussion CSV.
#[instrument(skip_all, fields(source = %source))]
pub async fn load_rows(
    source: &CsvSource,
    fields: &SourceConfig,
    client: &Client,
) -> Result<Vec<DiscussionRow>> {
    let data = source.read(client).await?;
    parse_rows(&data, fields)
}

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

/// One discussion comment on a paper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comment {
    pub name: String,
    pub date: String,
    pub text: String,
}

/// A paper together with every visible discussion of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaperEntry {
    pub arxiv_id: String,
    /// Id of the most recent row mentioning the paper.
    pub latest: ItemId,
    /// Date of the most recent row.
    pub date: String,
    /// Comments in row order.
    pub comments: Vec<Comment>,
}

/// Group visible rows by paper, most recently discussed first.
pub fn group_entries(rows: &[DiscussionRow]) -> Vec<PaperEntry> {
    let mut by_paper: HashMap<&str, PaperEntry> = HashMap::new();

    for row in rows.iter().filter(|r| !r.hidden) {
        let Some(arxiv_id) = row.arxiv_id.as_deref() else {
            continue;
        };
        let date = row.short_date();
        let comment = Comment {
            name: row.name.clone(),
            date: date.clone(),
            text: row.comments.clone(),
        };

        let entry = by_paper.entry(arxiv_id).or_insert_with(|| PaperEntry {
            arxiv_id: arxiv_id.to_string(),
            latest: row.id,
            date: date.clone(),
            comments: Vec::new(),
        });
        if row.id >= entry.latest {
            entry.latest = row.id;
            entry.date = date;
        }
        entry.comments.push(comment);
    }

    let mut entries: Vec<PaperEntry> = by_paper.into_values().collect();
    entries.sort_by(|a, b| b.latest.cmp(&a.latest));
    entries
}

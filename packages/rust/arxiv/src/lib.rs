//! arXiv metadata client.
//!
//! Discussions reference papers by arXiv id. Before rendering, the ids with
//! no cached metadata are looked up through the arXiv Atom API in batches,
//! with a linear backoff between attempts because the API is rate limited
//! and intermittently answers with non-feed bodies.

mod feed;
mod id;

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use paperdisc_shared::{ArxivConfig, PaperDiscError, PaperMeta, Result};
use reqwest::Client;
use tracing::{debug, info, instrument, warn};
use url::Url;

pub use feed::{FeedEntry, parse_feed};
pub use id::normalize_arxiv_id;

/// User-Agent string for API requests.
const USER_AGENT: &str = concat!("paperdisc/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 3;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Settings for [`ArxivClient`].
#[derive(Debug, Clone)]
pub struct ArxivOptions {
    /// Query endpoint, e.g. `http://export.arxiv.org/api/query`.
    pub api_url: Url,
    /// Ids per request.
    pub batch_size: usize,
    /// Authors kept per paper.
    pub authors_limit: usize,
    /// Attempts per batch before giving up.
    pub max_attempts: u32,
    /// Sleep before retry `n` is `n * retry_base`.
    pub retry_base: Duration,
    pub timeout: Duration,
}

impl TryFrom<&ArxivConfig> for ArxivOptions {
    type Error = PaperDiscError;

    fn try_from(cfg: &ArxivConfig) -> Result<Self> {
        let api_url = Url::parse(&cfg.api_url).map_err(|e| {
            PaperDiscError::config(format!("invalid arxiv.api_url '{}': {e}", cfg.api_url))
        })?;
        Ok(Self {
            api_url,
            batch_size: cfg.batch_size.max(1),
            authors_limit: cfg.authors_limit,
            max_attempts: cfg.max_attempts.max(1),
            retry_base: Duration::from_millis(cfg.retry_base_ms),
            timeout: Duration::from_secs(cfg.timeout_secs),
        })
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Batched, retrying client for the arXiv query API.
#[derive(Debug, Clone)]
pub struct ArxivClient {
    client: Client,
    opts: ArxivOptions,
}

impl ArxivClient {
    pub fn new(opts: ArxivOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(opts.timeout)
            .build()
            .map_err(|e| PaperDiscError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, opts })
    }

    pub fn from_config(cfg: &ArxivConfig) -> Result<Self> {
        Self::new(ArxivOptions::try_from(cfg)?)
    }

    /// Fetch metadata for every id in `ids` that `known` lacks.
    ///
    /// Returns only the newly fetched papers, keyed by normalized id. Ids the
    /// API does not return are logged and left out.
    #[instrument(skip_all, fields(requested = ids.len()))]
    pub async fn fetch_metadata(
        &self,
        ids: &[String],
        known: &HashMap<String, PaperMeta>,
    ) -> Result<HashMap<String, PaperMeta>> {
        let missing: Vec<String> = ids
            .iter()
            .filter(|id| !known.contains_key(id.as_str()))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut fetched = HashMap::new();
        if missing.is_empty() {
            debug!("all papers cached");
            return Ok(fetched);
        }

        info!(missing = missing.len(), "fetching arXiv metadata");

        for batch in missing.chunks(self.opts.batch_size) {
            let url = self.batch_url(batch);
            let body = self.get_feed(&url).await?;
            for entry in parse_feed(&body) {
                let meta = self.to_meta(entry.title, entry.authors, entry.summary);
                fetched.insert(entry.id, meta);
            }
        }

        for id in missing.iter().filter(|id| !fetched.contains_key(id.as_str())) {
            warn!(arxiv_id = %id, "no metadata returned");
        }

        Ok(fetched)
    }

    fn batch_url(&self, batch: &[String]) -> Url {
        let mut url = self.opts.api_url.clone();
        url.query_pairs_mut()
            .append_pair("id_list", &batch.join(","))
            .append_pair("max_results", &self.opts.batch_size.to_string());
        url
    }

    fn to_meta(&self, title: String, mut authors: Vec<String>, summary: String) -> PaperMeta {
        let has_more_authors = authors.len() > self.opts.authors_limit;
        authors.truncate(self.opts.authors_limit);
        PaperMeta {
            title,
            authors,
            has_more_authors,
            summary,
        }
    }

    /// GET a feed, retrying until the body looks like XML.
    async fn get_feed(&self, url: &Url) -> Result<String> {
        let mut last_err = None;

        for attempt in 1..=self.opts.max_attempts {
            match self.fetch_once(url).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    warn!(attempt, max = self.opts.max_attempts, error = %e, "arXiv request failed");
                    last_err = Some(e);
                }
            }
            if attempt < self.opts.max_attempts {
                tokio::time::sleep(self.opts.retry_base * attempt).await;
            }
        }

        Err(PaperDiscError::Network(format!(
            "arXiv API gave up after {} attempts: {}",
            self.opts.max_attempts,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn fetch_once(&self, url: &Url) -> Result<String> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| PaperDiscError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PaperDiscError::Network(format!("{url}: HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| PaperDiscError::Network(format!("{url}: failed to read body: {e}")))?;

        if !body.trim_start().starts_with("<?xml") {
            return Err(PaperDiscError::parse(format!("{url}: response is not XML")));
        }

        Ok(body)
    }
}

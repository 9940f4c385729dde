//! Discussion page pipeline: CSV → new rows → paper entries → arXiv
//! metadata → rendered page.

use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use chrono::Utc;
use chrono_tz::Tz;
use reqwest::Client;
use tracing::{info, instrument, warn};

use paperdisc_arxiv::ArxivClient;
use paperdisc_shared::{AppConfig, ItemId, PaperDiscError, PaperMeta, Result};
use paperdisc_storage::Storage;

use crate::assembler::{
    PageWrite, read_entries_digest, sha256_hex, write_entries_digest, write_page,
};
use crate::discussions::{CsvSource, PaperEntry, group_entries, load_rows};
use crate::processor::{DiscussionProcessor, ProcessReport};
use crate::render::{TIME_FORMAT, build_page};

/// User-Agent string for CSV downloads.
const USER_AGENT: &str = concat!("paperdisc/", env!("CARGO_PKG_VERSION"));

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called once the CSV is parsed.
    fn rows_loaded(&self, total: usize, new: usize);
    /// Called once metadata is resolved for every referenced paper.
    fn papers_resolved(&self, cached: usize, fetched: usize);
    /// Called when the page has been written (or found unchanged).
    fn done(&self, report: &ProcessReport, page: &PageWrite);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn rows_loaded(&self, _total: usize, _new: usize) {}
    fn papers_resolved(&self, _cached: usize, _fetched: usize) {}
    fn done(&self, _report: &ProcessReport, _page: &PageWrite) {}
}

/// Renders the discussion page from the configured CSV.
pub struct ArxivPageProcessor {
    config: AppConfig,
    http: Client,
    arxiv: ArxivClient,
    progress: Box<dyn ProgressReporter>,
}

impl ArxivPageProcessor {
    pub fn new(config: AppConfig, progress: Box<dyn ProgressReporter>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(config.arxiv.timeout_secs))
            .build()
            .map_err(|e| PaperDiscError::Network(format!("failed to build HTTP client: {e}")))?;
        let arxiv = ArxivClient::from_config(&config.arxiv)?;
        Ok(Self {
            config,
            http,
            arxiv,
            progress,
        })
    }

    fn timezone(&self) -> Result<Tz> {
        let raw = &self.config.output.timezone;
        raw.parse::<Tz>()
            .map_err(|e| PaperDiscError::config(format!("invalid output.timezone '{raw}': {e}")))
    }

    /// Metadata for every entry: cache first, then the arXiv API.
    async fn resolve_metadata(
        &self,
        entries: &[PaperEntry],
    ) -> Result<HashMap<String, PaperMeta>> {
        let cache = match self.config.arxiv.cache_path() {
            Some(path) => Some(Storage::open(Path::new(path)).await?),
            None => None,
        };
        let mut known = match &cache {
            Some(cache) => cache.load_papers().await?,
            None => HashMap::new(),
        };

        let ids: Vec<String> = entries.iter().map(|e| e.arxiv_id.clone()).collect();
        let fetched = self.arxiv.fetch_metadata(&ids, &known).await?;

        if let Some(cache) = &cache {
            for (id, meta) in &fetched {
                // The page can still be rendered; the paper is refetched next run.
                if let Err(e) = cache.upsert_paper(id, meta).await {
                    warn!(arxiv_id = %id, error = %e, "failed to cache paper metadata");
                }
            }
        }

        self.progress
            .papers_resolved(ids.len().saturating_sub(fetched.len()), fetched.len());
        known.extend(fetched);
        Ok(known)
    }
}

impl DiscussionProcessor for ArxivPageProcessor {
    fn validate(&self) -> Result<()> {
        match CsvSource::parse(&self.config.source.csv)? {
            CsvSource::Path(path) if !path.is_file() => {
                return Err(PaperDiscError::config(format!(
                    "discussion CSV not found: {}",
                    path.display()
                )));
            }
            _ => {}
        }

        let template = Path::new(&self.config.output.template);
        if !template.is_file() {
            return Err(PaperDiscError::config(format!(
                "page template not found: {}",
                template.display()
            )));
        }

        self.timezone()?;
        Ok(())
    }

    /// 1. Load the CSV and pick the rows newer than `last_id`
    /// 2. Group visible rows by paper
    /// 3. Resolve arXiv metadata
    /// 4. Render and write the page
    ///
    /// With no new rows the page is still re-rendered when the visible
    /// entries differ from the ones it was last rendered from, so hiding a
    /// published row takes effect. The report then stays empty.
    #[instrument(skip_all, fields(last_id = %last_id))]
    async fn process_since(&self, last_id: ItemId) -> Result<ProcessReport> {
        let start = Instant::now();
        let output = Path::new(&self.config.output.path);

        // --- Phase 1: Load discussions ---
        self.progress.phase("Loading discussions");
        let source = CsvSource::parse(&self.config.source.csv)?;
        let rows = load_rows(&source, &self.config.source, &self.http).await?;
        let new_ids: Vec<ItemId> = rows.iter().map(|r| r.id).filter(|id| *id > last_id).collect();
        self.progress.rows_loaded(rows.len(), new_ids.len());

        if (rows.len() as u64) < last_id.0 {
            warn!(
                rows = rows.len(),
                %last_id,
                "discussion CSV has fewer rows than the checkpoint, were rows deleted?"
            );
        }

        // --- Phase 2: Group ---
        let entries = group_entries(&rows);
        let digest = sha256_hex(&serde_json::to_vec(&entries).map_err(|e| {
            PaperDiscError::parse(format!("cannot encode discussion entries: {e}"))
        })?);

        if new_ids.is_empty() {
            let unchanged = output.is_file()
                && read_entries_digest(output)?.as_deref() == Some(digest.as_str());
            if unchanged {
                info!(rows = rows.len(), "no new discussion rows");
                return Ok(ProcessReport::empty());
            }
            info!(rows = rows.len(), "visible discussions changed, re-rendering page");
        }

        info!(
            rows = rows.len(),
            new = new_ids.len(),
            papers = entries.len(),
            "discussions loaded"
        );

        // --- Phase 3: Metadata ---
        self.progress.phase("Fetching arXiv metadata");
        let metadata = self.resolve_metadata(&entries).await?;

        // --- Phase 4: Render ---
        self.progress.phase("Rendering page");
        let template_path = Path::new(&self.config.output.template);
        let template = std::fs::read_to_string(template_path)
            .map_err(|e| PaperDiscError::io(template_path, e))?;
        let rendered_at = Utc::now()
            .with_timezone(&self.timezone()?)
            .format(TIME_FORMAT)
            .to_string();
        let html = build_page(&template, &entries, &metadata, &rendered_at)?;

        // --- Phase 5: Write ---
        self.progress.phase("Writing page");
        let page = write_page(output, &html)?;
        // A stale digest only costs one extra render next run.
        if let Err(e) = write_entries_digest(output, &digest) {
            warn!(error = %e, "failed to record entries digest");
        }

        let report = ProcessReport::from_ids(new_ids);
        info!(
            count = report.count,
            highest_id = ?report.highest_id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "discussion page updated"
        );
        self.progress.done(&report, &page);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use paperdisc_shared::{ArxivConfig, OutputConfig, SourceConfig};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pd-pipeline-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Workspace with the fixture CSV and template copied in.
    fn make_config(tmp: &Path, api_base: &str) -> AppConfig {
        let csv = tmp.join("discussions.csv");
        let template = tmp.join("template.html");
        std::fs::copy("../../../fixtures/csv/discussions.csv", &csv).unwrap();
        std::fs::copy("../../../fixtures/html/template.html", &template).unwrap();

        AppConfig {
            source: SourceConfig {
                csv: csv.display().to_string(),
                ..SourceConfig::default()
            },
            arxiv: ArxivConfig {
                api_url: format!("{api_base}/api/query"),
                max_attempts: 1,
                retry_base_ms: 1,
                timeout_secs: 5,
                cache_db: Some(tmp.join("papers.db").display().to_string()),
                ..ArxivConfig::default()
            },
            output: OutputConfig {
                template: template.display().to_string(),
                path: tmp.join("out").join("index.html").display().to_string(),
                timezone: "US/Mountain".into(),
            },
            ..AppConfig::default()
        }
    }

    async fn mount_feed(server: &MockServer, expected_calls: u64) {
        let feed = std::fs::read_to_string("../../../fixtures/arxiv/feed.xml").unwrap();
        Mock::given(method("GET"))
            .and(path("/api/query"))
            .and(query_param("id_list", "1706.03762,hep-th/9901001"))
            .respond_with(ResponseTemplate::new(200).set_body_string(feed))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    #[derive(Default, Clone)]
    struct RecordingProgress {
        phases: Arc<Mutex<Vec<String>>>,
    }

    impl ProgressReporter for RecordingProgress {
        fn phase(&self, name: &str) {
            self.phases.lock().unwrap().push(name.to_string());
        }
        fn rows_loaded(&self, _total: usize, _new: usize) {}
        fn papers_resolved(&self, _cached: usize, _fetched: usize) {}
        fn done(&self, _report: &ProcessReport, _page: &PageWrite) {}
    }

    #[tokio::test]
    async fn first_run_renders_every_paper() {
        let server = MockServer::start().await;
        mount_feed(&server, 1).await;
        let tmp = temp_dir();
        let config = make_config(&tmp, &server.uri());
        let output = PathBuf::from(&config.output.path);

        let processor = ArxivPageProcessor::new(config, Box::new(SilentProgress)).unwrap();
        processor.validate().unwrap();
        let report = processor.process_since(ItemId::ZERO).await.unwrap();

        assert_eq!(report.count, 6);
        assert_eq!(report.highest_id, Some(ItemId(6)));

        let html = std::fs::read_to_string(&output).unwrap();
        assert!(html.contains("Attention Is All You Need"));
        assert!(html.contains("A Toy Model of Strings &amp; Branes"));
        assert!(html.contains("et al."));
        assert!(html.contains(r#"id="cm-6""#));
        assert!(html.contains("<b>Frank</b> (10&#x2F;03): Follow-up next week"));
        assert!(!html.contains("Carol"));
        assert!(!html.contains("<!-- TIME -->"));
        assert!(!html.contains("<!-- ENTRIES -->"));

        // Newest discussion first.
        let attention = html.find("1706.03762").unwrap();
        let toy = html.find("hep-th/9901001").unwrap();
        assert!(attention < toy);
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn nothing_new_leaves_page_alone() {
        let server = MockServer::start().await;
        mount_feed(&server, 1).await;
        let tmp = temp_dir();
        let config = make_config(&tmp, &server.uri());
        let output = PathBuf::from(&config.output.path);

        let progress = RecordingProgress::default();

        let processor = ArxivPageProcessor::new(config, Box::new(progress.clone())).unwrap();
        processor.process_since(ItemId::ZERO).await.unwrap();
        progress.phases.lock().unwrap().clear();

        let report = processor.process_since(ItemId(6)).await.unwrap();

        assert_eq!(report, ProcessReport::empty());
        assert_eq!(*progress.phases.lock().unwrap(), vec!["Loading discussions"]);
        assert!(output.is_file());
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn hiding_a_published_row_rerenders_page() {
        let server = MockServer::start().await;
        mount_feed(&server, 1).await;
        let tmp = temp_dir();
        let config = make_config(&tmp, &server.uri());
        let output = PathBuf::from(&config.output.path);
        let csv = PathBuf::from(&config.source.csv);

        let processor = ArxivPageProcessor::new(config, Box::new(SilentProgress)).unwrap();
        processor.process_since(ItemId::ZERO).await.unwrap();
        assert!(std::fs::read_to_string(&output).unwrap().contains("<b>Alice</b>"));

        let sheet = std::fs::read_to_string(&csv).unwrap();
        let hidden = sheet.replacen("section is short.\",\n", "section is short.\",TRUE\n", 1);
        assert_ne!(sheet, hidden);
        std::fs::write(&csv, hidden).unwrap();

        let report = processor.process_since(ItemId(6)).await.unwrap();

        assert_eq!(report, ProcessReport::empty());
        let html = std::fs::read_to_string(&output).unwrap();
        assert!(!html.contains("<b>Alice</b>"));
        assert!(html.contains("<b>Dana</b>"));
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn missing_page_is_rebuilt_without_new_rows() {
        let server = MockServer::start().await;
        mount_feed(&server, 1).await;
        let tmp = temp_dir();
        let config = make_config(&tmp, &server.uri());
        let output = PathBuf::from(&config.output.path);

        let processor = ArxivPageProcessor::new(config, Box::new(SilentProgress)).unwrap();
        processor.process_since(ItemId::ZERO).await.unwrap();
        std::fs::remove_file(&output).unwrap();

        let report = processor.process_since(ItemId(6)).await.unwrap();

        assert_eq!(report.count, 0);
        assert!(std::fs::read_to_string(&output).unwrap().contains("Attention Is All You Need"));
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn cached_papers_are_not_refetched() {
        let server = MockServer::start().await;
        mount_feed(&server, 1).await;
        let tmp = temp_dir();
        let config = make_config(&tmp, &server.uri());

        let processor = ArxivPageProcessor::new(config.clone(), Box::new(SilentProgress)).unwrap();
        processor.process_since(ItemId::ZERO).await.unwrap();

        let processor = ArxivPageProcessor::new(config, Box::new(SilentProgress)).unwrap();
        let report = processor.process_since(ItemId(3)).await.unwrap();
        assert_eq!(report.count, 3);
        assert_eq!(report.highest_id, Some(ItemId(6)));
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn api_failure_writes_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let tmp = temp_dir();
        let config = make_config(&tmp, &server.uri());
        let output = PathBuf::from(&config.output.path);

        let processor = ArxivPageProcessor::new(config, Box::new(SilentProgress)).unwrap();
        let err = processor.process_since(ItemId::ZERO).await.unwrap_err();

        assert!(matches!(err, PaperDiscError::Network(_)));
        assert!(!output.exists());
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn reports_phases() {
        let server = MockServer::start().await;
        mount_feed(&server, 1).await;
        let tmp = temp_dir();
        let config = make_config(&tmp, &server.uri());
        let progress = RecordingProgress::default();

        let processor = ArxivPageProcessor::new(config, Box::new(progress.clone())).unwrap();
        processor.process_since(ItemId::ZERO).await.unwrap();

        assert_eq!(
            *progress.phases.lock().unwrap(),
            vec![
                "Loading discussions",
                "Fetching arXiv metadata",
                "Rendering page",
                "Writing page"
            ]
        );
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn validate_rejects_missing_template() {
        let tmp = temp_dir();
        let mut config = make_config(&tmp, "http://127.0.0.1:9");
        config.output.template = tmp.join("nope.html").display().to_string();

        let processor = ArxivPageProcessor::new(config, Box::new(SilentProgress)).unwrap();
        let err = processor.validate().unwrap_err();
        assert!(err.to_string().contains("page template not found"));
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn validate_rejects_missing_csv() {
        let tmp = temp_dir();
        let mut config = make_config(&tmp, "http://127.0.0.1:9");
        config.source.csv = tmp.join("missing.csv").display().to_string();

        let processor = ArxivPageProcessor::new(config, Box::new(SilentProgress)).unwrap();
        assert!(matches!(
            processor.validate(),
            Err(PaperDiscError::Config { .. })
        ));
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn validate_accepts_csv_url() {
        let tmp = temp_dir();
        let mut config = make_config(&tmp, "http://127.0.0.1:9");
        config.source.csv = "https://docs.example.com/export?format=csv".into();

        let processor = ArxivPageProcessor::new(config, Box::new(SilentProgress)).unwrap();
        processor.validate().unwrap();
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn validate_rejects_unknown_timezone() {
        let tmp = temp_dir();
        let mut config = make_config(&tmp, "http://127.0.0.1:9");
        config.output.timezone = "Mars/Olympus_Mons".into();

        let processor = ArxivPageProcessor::new(config, Box::new(SilentProgress)).unwrap();
        assert!(processor.validate().is_err());
        let _ = std::fs::remove_dir_all(&tmp);
    }
}

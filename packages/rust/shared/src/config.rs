//! Application configuration for paper-discussion.
//!
//! User config lives at `~/.paperdisc/paperdisc.toml` unless a path is given
//! with `--config`. Every key is optional; missing keys take their defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{PaperDiscError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "paperdisc.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".paperdisc";

// ---------------------------------------------------------------------------
// Config structs (matching paperdisc.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Checkpoint storage.
    #[serde(default)]
    pub state: StateConfig,

    /// Overlapping-run protection.
    #[serde(default)]
    pub lease: LeaseConfig,

    /// Discussion CSV source.
    #[serde(default)]
    pub source: SourceConfig,

    /// arXiv API access.
    #[serde(default)]
    pub arxiv: ArxivConfig,

    /// Rendered page output.
    #[serde(default)]
    pub output: OutputConfig,
}

/// Which state store implementation holds the checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackendKind {
    /// JSON record replaced by atomic rename.
    #[default]
    File,
    /// libSQL database file.
    Libsql,
}

/// `[state]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub backend: StateBackendKind,

    /// Checkpoint location (JSON file or database file, per backend).
    #[serde(default = "default_state_path")]
    pub path: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackendKind::default(),
            path: default_state_path(),
        }
    }
}

fn default_state_path() -> String {
    "var/state/checkpoint.json".into()
}

/// `[lease]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Lease lifetime; a crashed run blocks others for at most this long.
    #[serde(default = "default_lease_ttl")]
    pub ttl_secs: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_lease_ttl(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_lease_ttl() -> u64 {
    1800
}

/// `[source]` section. Field names default to the form export's headers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Local path or http(s) URL of the discussion CSV. Rows are identified
    /// by position, so the sheet must be append-only; hide rows, never delete
    /// them.
    #[serde(default = "default_csv")]
    pub csv: String,
    #[serde(default = "default_date_field")]
    pub date_field: String,
    #[serde(default = "default_name_field")]
    pub name_field: String,
    #[serde(default = "default_arxiv_id_field")]
    pub arxiv_id_field: String,
    #[serde(default = "default_comments_field")]
    pub comments_field: String,
    #[serde(default = "default_hide_field")]
    pub hide_field: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            csv: default_csv(),
            date_field: default_date_field(),
            name_field: default_name_field(),
            arxiv_id_field: default_arxiv_id_field(),
            comments_field: default_comments_field(),
            hide_field: default_hide_field(),
        }
    }
}

fn default_csv() -> String {
    "discussions.csv".into()
}
fn default_date_field() -> String {
    "Timestamp".into()
}
fn default_name_field() -> String {
    "Name".into()
}
fn default_arxiv_id_field() -> String {
    "arXiv URL or ID".into()
}
fn default_comments_field() -> String {
    "Comments".into()
}
fn default_hide_field() -> String {
    "Hide".into()
}

/// `[arxiv]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArxivConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Ids per API request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Authors kept per paper; the rest become "et al.".
    #[serde(default = "default_authors_limit")]
    pub authors_limit: usize,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Sleep before retry `n` is `n * retry_base_ms`.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// libSQL metadata cache. An empty string turns caching off.
    #[serde(default = "default_cache_db", skip_serializing_if = "Option::is_none")]
    pub cache_db: Option<String>,
}

impl Default for ArxivConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            batch_size: default_batch_size(),
            authors_limit: default_authors_limit(),
            max_attempts: default_max_attempts(),
            retry_base_ms: default_retry_base_ms(),
            timeout_secs: default_timeout_secs(),
            cache_db: default_cache_db(),
        }
    }
}

impl ArxivConfig {
    /// Configured cache location, if caching is on.
    pub fn cache_path(&self) -> Option<&str> {
        self.cache_db
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

fn default_api_url() -> String {
    "http://export.arxiv.org/api/query".into()
}
fn default_batch_size() -> usize {
    50
}
fn default_authors_limit() -> usize {
    6
}
fn default_max_attempts() -> u32 {
    10
}
fn default_retry_base_ms() -> u64 {
    2000
}
fn default_timeout_secs() -> u64 {
    20
}
fn default_cache_db() -> Option<String> {
    Some("var/state/papers.db".into())
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// HTML template containing `<!-- TIME -->` and `<!-- ENTRIES -->`.
    #[serde(default = "default_template")]
    pub template: String,

    /// Rendered page location.
    #[serde(default = "default_output_path")]
    pub path: String,

    /// IANA timezone for the "last updated" stamp.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            template: default_template(),
            path: default_output_path(),
            timezone: default_timezone(),
        }
    }
}

fn default_template() -> String {
    "template.html".into()
}
fn default_output_path() -> String {
    "index.html".into()
}
fn default_timezone() -> String {
    "US/Mountain".into()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.paperdisc/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PaperDiscError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.paperdisc/paperdisc.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from the default location. Returns defaults
/// if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load from an explicit path if given (it must exist), else the default
/// location.
pub fn load_config_at(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(p) => {
            if !p.exists() {
                return Err(PaperDiscError::config(format!(
                    "config file not found: {}",
                    p.display()
                )));
            }
            load_config_from(p)
        }
        None => load_config(),
    }
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PaperDiscError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        PaperDiscError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PaperDiscError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PaperDiscError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PaperDiscError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject values that would only fail later, mid-run.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.source.csv.trim().is_empty() {
        return Err(PaperDiscError::config("source.csv must not be empty"));
    }
    if config.state.path.trim().is_empty() {
        return Err(PaperDiscError::config("state.path must not be empty"));
    }
    if config.arxiv.batch_size == 0 {
        return Err(PaperDiscError::config("arxiv.batch_size must be at least 1"));
    }
    if config.arxiv.max_attempts == 0 {
        return Err(PaperDiscError::config("arxiv.max_attempts must be at least 1"));
    }
    if config.lease.enabled && config.lease.ttl_secs == 0 {
        return Err(PaperDiscError::config("lease.ttl_secs must be at least 1"));
    }
    Url::parse(&config.arxiv.api_url).map_err(|e| {
        PaperDiscError::config(format!("invalid arxiv.api_url '{}': {e}", config.arxiv.api_url))
    })?;
    config
        .output
        .timezone
        .parse::<chrono_tz::Tz>()
        .map_err(|e| PaperDiscError::config(format!("invalid output.timezone: {e}")))?;
    Ok(())
}

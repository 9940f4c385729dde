//! libSQL storage layer (local file mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding the run checkpoint,
//! the run lease, and the arXiv metadata cache.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use libsql::{Connection, Database, params};
use paperdisc_shared::{ItemId, PaperDiscError, PaperMeta, Result, RunState};
use tracing::debug;

use crate::{StateStore, migrations};

/// Row key of the checkpoint and lease; one job stream per database.
const STREAM_NAME: &str = "paper-discussions";

fn db_err(e: impl std::fmt::Display) -> PaperDiscError {
    PaperDiscError::Storage(e.to_string())
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| PaperDiscError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        PaperDiscError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Paper metadata cache
    // -----------------------------------------------------------------------

    /// Load every cached paper, keyed by normalized arXiv id.
    pub async fn load_papers(&self) -> Result<HashMap<String, PaperMeta>> {
        let mut rows = self
            .conn
            .query(
                "SELECT arxiv_id, title, authors_json, has_more_authors, abstract FROM papers",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut papers = HashMap::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let id: String = row.get(0).map_err(db_err)?;
            let authors_json: String = row.get(2).map_err(db_err)?;
            let authors: Vec<String> = serde_json::from_str(&authors_json).map_err(|e| {
                PaperDiscError::Storage(format!("invalid authors for {id}: {e}"))
            })?;
            papers.insert(
                id,
                PaperMeta {
                    title: row.get(1).map_err(db_err)?,
                    authors,
                    has_more_authors: row.get::<i64>(3).map_err(db_err)? != 0,
                    summary: row.get(4).map_err(db_err)?,
                },
            );
        }
        Ok(papers)
    }

    /// Insert or refresh one cached paper.
    pub async fn upsert_paper(&self, arxiv_id: &str, meta: &PaperMeta) -> Result<()> {
        let authors_json = serde_json::to_string(&meta.authors).map_err(db_err)?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO papers (arxiv_id, title, authors_json, has_more_authors, abstract, fetched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(arxiv_id) DO UPDATE SET
                   title = excluded.title,
                   authors_json = excluded.authors_json,
                   has_more_authors = excluded.has_more_authors,
                   abstract = excluded.abstract,
                   fetched_at = excluded.fetched_at",
                params![
                    arxiv_id,
                    meta.title.as_str(),
                    authors_json.as_str(),
                    i64::from(meta.has_more_authors),
                    meta.summary.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

impl StateStore for Storage {
    async fn load(&self) -> Result<Option<RunState>> {
        let mut rows = self
            .conn
            .query(
                "SELECT schema_version, last_processed_id, last_run_timestamp
                 FROM checkpoint WHERE name = ?1",
                params![STREAM_NAME],
            )
            .await
            .map_err(db_err)?;

        let Some(row) = rows.next().await.map_err(db_err)? else {
            return Ok(None);
        };

        let id: String = row.get(1).map_err(db_err)?;
        let last_processed_id: ItemId = id
            .parse()
            .map_err(|e| PaperDiscError::Storage(format!("corrupt checkpoint id '{id}': {e}")))?;
        let ts: String = row.get(2).map_err(db_err)?;
        let last_run_timestamp = chrono::DateTime::parse_from_rfc3339(&ts)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| PaperDiscError::Storage(format!("corrupt checkpoint timestamp: {e}")))?;

        let state = RunState {
            schema_version: row.get::<u32>(0).map_err(db_err)?,
            last_processed_id,
            last_run_timestamp,
        };
        state.ensure_supported()?;
        Ok(Some(state))
    }

    async fn save(&self, state: &RunState) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO checkpoint (name, schema_version, last_processed_id, last_run_timestamp)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(name) DO UPDATE SET
                   schema_version = excluded.schema_version,
                   last_processed_id = excluded.last_processed_id,
                   last_run_timestamp = excluded.last_run_timestamp",
                params![
                    STREAM_NAME,
                    i64::from(state.schema_version),
                    state.last_processed_id.to_string(),
                    state.last_run_timestamp.to_rfc3339(),
                ],
            )
            .await
            .map_err(db_err)?;
        debug!(last_processed_id = %state.last_processed_id, "checkpoint saved");
        Ok(())
    }

    async fn acquire_lease(&self, holder: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        let ttl_ms = i64::try_from(ttl.as_millis())
            .map_err(|_| PaperDiscError::validation("lease ttl out of range"))?;

        let changed = self
            .conn
            .execute(
                "INSERT INTO leases (name, holder, acquired_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(name) DO UPDATE SET
                   holder = excluded.holder,
                   acquired_at = excluded.acquired_at,
                   expires_at = excluded.expires_at
                 WHERE leases.expires_at <= excluded.acquired_at",
                params![STREAM_NAME, holder, now, now + ttl_ms],
            )
            .await
            .map_err(db_err)?;

        debug!(holder, acquired = changed > 0, "lease attempt");
        Ok(changed > 0)
    }

    async fn release_lease(&self, holder: &str) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM leases WHERE name = ?1 AND holder = ?2",
                params![STREAM_NAME, holder],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

//! Checkpoint persistence for scheduled runs.
//!
//! The [`StateStore`] trait is the only thing the run coordinator depends on.
//! Two backends implement it:
//! - [`FileStateStore`]: a JSON record replaced by atomic rename, with a
//!   sibling lease file
//! - [`Storage`]: a libSQL database that also holds the arXiv metadata cache
//!
//! [`StateBackend`] picks one at runtime from configuration.

mod db;
mod file;
mod migrations;

use std::path::Path;
use std::time::Duration;

use paperdisc_shared::{AppConfig, Result, RunState, StateBackendKind};

pub use db::Storage;
pub use file::FileStateStore;

/// Durable home of the run checkpoint and the run lease.
///
/// Single writer per run; `save` fully overwrites the previous record.
#[allow(async_fn_in_trait)]
pub trait StateStore {
    /// Read the checkpoint. `None` on first run.
    async fn load(&self) -> Result<Option<RunState>>;

    /// Replace the checkpoint. An interrupted save must leave the previous
    /// record readable.
    async fn save(&self, state: &RunState) -> Result<()>;

    /// Try to take the run lease for `ttl`. Returns `false` when another
    /// holder owns an unexpired lease.
    async fn acquire_lease(&self, holder: &str, ttl: Duration) -> Result<bool>;

    /// Drop the lease if `holder` still owns it.
    async fn release_lease(&self, holder: &str) -> Result<()>;
}

/// State store selected from `[state]` configuration.
pub enum StateBackend {
    File(FileStateStore),
    Libsql(Storage),
}

impl StateBackend {
    /// Open the configured backend.
    pub async fn open(config: &AppConfig) -> Result<Self> {
        let path = Path::new(&config.state.path);
        match config.state.backend {
            StateBackendKind::File => Ok(Self::File(FileStateStore::new(path))),
            StateBackendKind::Libsql => Ok(Self::Libsql(Storage::open(path).await?)),
        }
    }

    /// Backend name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Libsql(_) => "libsql",
        }
    }
}

impl StateStore for StateBackend {
    async fn load(&self) -> Result<Option<RunState>> {
        match self {
            Self::File(s) => s.load().await,
            Self::Libsql(s) => s.load().await,
        }
    }

    async fn save(&self, state: &RunState) -> Result<()> {
        match self {
            Self::File(s) => s.save(state).await,
            Self::Libsql(s) => s.save(state).await,
        }
    }

    async fn acquire_lease(&self, holder: &str, ttl: Duration) -> Result<bool> {
        match self {
            Self::File(s) => s.acquire_lease(holder, ttl).await,
            Self::Libsql(s) => s.acquire_lease(holder, ttl).await,
        }
    }

    async fn release_lease(&self, holder: &str) -> Result<()> {
        match self {
            Self::File(s) => s.release_lease(holder).await,
            Self::Libsql(s) => s.release_lease(holder).await,
        }
    }
}

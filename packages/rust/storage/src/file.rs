//! JSON-file state store.
//!
//! The checkpoint is a single JSON record replaced with
//! [`write_atomic`](paperdisc_shared::write_atomic). The lease is a sibling
//! `<file>.lease` record. It is written to a scratch file and hard-linked into
//! place, so it appears complete or not at all, and a second run's link fails.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use paperdisc_shared::{Lease, PaperDiscError, Result, RunState, write_atomic};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::StateStore;

/// Checkpoint stored as a JSON file at a fixed path.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
    lease_path: PathBuf,
}

/// What the lease path currently holds.
enum LeaseRecord {
    Missing,
    Held { lease: Lease, raw: Vec<u8> },
    /// Not a lease record. `age` is the time since its last modification.
    Unreadable { raw: Vec<u8>, age: Option<Duration> },
}

impl FileStateStore {
    /// Store rooted at `path`; nothing is touched until the first call.
    pub fn new(path: &Path) -> Self {
        let mut lease_name = path.as_os_str().to_owned();
        lease_name.push(".lease");
        Self {
            path: path.to_path_buf(),
            lease_path: PathBuf::from(lease_name),
        }
    }

    /// Location of the checkpoint record.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Location of the lease record.
    pub fn lease_path(&self) -> &Path {
        &self.lease_path
    }

    fn lease_dir(&self) -> &Path {
        match self.lease_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }

    /// Unique hidden path next to the lease record.
    fn scratch_path(&self, suffix: &str) -> PathBuf {
        let name = self
            .lease_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "lease".into());
        self.lease_dir()
            .join(format!(".{name}.{}.{suffix}", Uuid::now_v7()))
    }

    fn read_record(&self) -> Result<LeaseRecord> {
        let raw = match std::fs::read(&self.lease_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LeaseRecord::Missing),
            Err(e) => return Err(PaperDiscError::io(&self.lease_path, e)),
        };
        match serde_json::from_slice::<Lease>(&raw) {
            Ok(lease) => Ok(LeaseRecord::Held { lease, raw }),
            Err(e) => {
                debug!(path = %self.lease_path.display(), error = %e, "unreadable lease record");
                let age = std::fs::metadata(&self.lease_path)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|t| t.elapsed().ok());
                Ok(LeaseRecord::Unreadable { raw, age })
            }
        }
    }

    fn read_lease(&self) -> Result<Option<Lease>> {
        Ok(match self.read_record()? {
            LeaseRecord::Held { lease, .. } => Some(lease),
            LeaseRecord::Missing | LeaseRecord::Unreadable { .. } => None,
        })
    }

    /// Publish `content` as the lease record unless one already exists.
    fn create_lease(&self, content: &[u8]) -> Result<bool> {
        let scratch = self.scratch_path("tmp");
        let written = (|| -> std::io::Result<()> {
            let mut file = std::fs::File::create(&scratch)?;
            file.write_all(content)?;
            file.sync_all()
        })();
        if let Err(e) = written {
            let _ = std::fs::remove_file(&scratch);
            return Err(PaperDiscError::io(&scratch, e));
        }

        let linked = std::fs::hard_link(&scratch, &self.lease_path);
        let _ = std::fs::remove_file(&scratch);
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(PaperDiscError::io(&self.lease_path, e)),
        }
    }

    /// Move a stale lease record out of the way.
    ///
    /// Only one of several racing runs can rename the record. If the record it
    /// got is not `expected`, another run already replaced the stale lease, so
    /// the record is put back and the takeover is abandoned.
    fn set_aside(&self, expected: &[u8]) -> Result<bool> {
        let aside = self.scratch_path("stale");
        match std::fs::rename(&self.lease_path, &aside) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(PaperDiscError::io(&self.lease_path, e)),
        }

        let matches = std::fs::read(&aside).is_ok_and(|taken| taken == expected);
        if !matches {
            if let Err(e) = std::fs::hard_link(&aside, &self.lease_path) {
                warn!(path = %self.lease_path.display(), error = %e, "could not restore lease record");
            }
        }
        let _ = std::fs::remove_file(&aside);
        Ok(matches)
    }

    fn lease_json(holder: &str, ttl: Duration) -> Result<Vec<u8>> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| PaperDiscError::validation(format!("lease ttl out of range: {e}")))?;
        let lease = Lease {
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + ttl,
        };
        serde_json::to_vec_pretty(&lease)
            .map_err(|e| PaperDiscError::Storage(format!("cannot encode lease: {e}")))
    }
}

impl StateStore for FileStateStore {
    async fn load(&self) -> Result<Option<RunState>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no checkpoint yet");
                return Ok(None);
            }
            Err(e) => return Err(PaperDiscError::io(&self.path, e)),
        };

        let state: RunState = serde_json::from_str(&content).map_err(|e| {
            PaperDiscError::Storage(format!(
                "corrupt checkpoint at {}: {e}",
                self.path.display()
            ))
        })?;
        state.ensure_supported()?;
        Ok(Some(state))
    }

    async fn save(&self, state: &RunState) -> Result<()> {
        let mut content = serde_json::to_vec_pretty(state)
            .map_err(|e| PaperDiscError::Storage(format!("cannot encode checkpoint: {e}")))?;
        content.push(b'\n');
        write_atomic(&self.path, &content)?;
        debug!(path = %self.path.display(), last_processed_id = %state.last_processed_id, "checkpoint saved");
        Ok(())
    }

    async fn acquire_lease(&self, holder: &str, ttl: Duration) -> Result<bool> {
        let dir = self.lease_dir();
        std::fs::create_dir_all(dir).map_err(|e| PaperDiscError::io(dir, e))?;

        let content = Self::lease_json(holder, ttl)?;
        if self.create_lease(&content)? {
            debug!(holder, "lease acquired");
            return Ok(true);
        }

        let stale = match self.read_record()? {
            // Released since the link attempt.
            LeaseRecord::Missing => return self.create_lease(&content),
            LeaseRecord::Held { lease, raw } => {
                if !lease.is_expired(Utc::now()) {
                    debug!(holder = %lease.holder, expires_at = %lease.expires_at, "lease held by another run");
                    return Ok(false);
                }
                info!(previous = %lease.holder, "taking over expired lease");
                raw
            }
            LeaseRecord::Unreadable { raw, age } => {
                if age.is_none_or(|age| age < ttl) {
                    debug!(path = %self.lease_path.display(), "recent unreadable lease, treating as held");
                    return Ok(false);
                }
                warn!(path = %self.lease_path.display(), "taking over unreadable lease");
                raw
            }
        };

        if !self.set_aside(&stale)? {
            debug!(holder, "lost lease takeover to another run");
            return Ok(false);
        }
        let acquired = self.create_lease(&content)?;
        if acquired {
            debug!(holder, "lease acquired");
        }
        Ok(acquired)
    }

    async fn release_lease(&self, holder: &str) -> Result<()> {
        match self.read_lease()? {
            Some(lease) if lease.holder == holder => {
                match std::fs::remove_file(&self.lease_path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(PaperDiscError::io(&self.lease_path, e)),
                }
                debug!(holder, "lease released");
                Ok(())
            }
            Some(lease) => {
                warn!(holder, owner = %lease.holder, "lease owned by another run, not releasing");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

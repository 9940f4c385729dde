//! Page output: atomic write of the rendered page, skipped when unchanged,
//! plus a digest of the entries the page was rendered from.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use paperdisc_shared::{PaperDiscError, Result, write_atomic};

/// What happened to the output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageWrite {
    /// New content was written.
    Written { sha256: String, size_bytes: usize },
    /// The existing file already had this content.
    Unchanged { sha256: String },
}

impl PageWrite {
    pub fn sha256(&self) -> &str {
        match self {
            Self::Written { sha256, .. } | Self::Unchanged { sha256 } => sha256,
        }
    }
}

pub(crate) fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Sidecar holding the entries digest of `target`.
fn digest_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".entries.sha256");
    PathBuf::from(name)
}

/// Digest recorded by the last [`write_entries_digest`] for `target`.
pub fn read_entries_digest(target: &Path) -> Result<Option<String>> {
    let path = digest_path(target);
    match std::fs::read_to_string(&path) {
        Ok(digest) => Ok(Some(digest.trim().to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PaperDiscError::io(&path, e)),
    }
}

/// Record the digest of the entries `target` was rendered from.
pub fn write_entries_digest(target: &Path, digest: &str) -> Result<()> {
    write_atomic(&digest_path(target), format!("{digest}\n").as_bytes())
}

/// Write `html` to `target` unless the file already holds the same bytes.
///
/// Readers of `target` see either the old page or the new one, never a
/// partial write.
#[instrument(skip_all, fields(target = %target.display()))]
pub fn write_page(target: &Path, html: &str) -> Result<PageWrite> {
    let sha256 = sha256_hex(html.as_bytes());

    match std::fs::read(target) {
        Ok(existing) if sha256_hex(&existing) == sha256 => {
            debug!(%sha256, "page unchanged, skipping write");
            return Ok(PageWrite::Unchanged { sha256 });
        }
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(PaperDiscError::io(target, e)),
    }

    write_atomic(target, html.as_bytes())?;
    info!(size = html.len(), %sha256, "page written");

    Ok(PageWrite::Written {
        sha256,
        size_bytes: html.len(),
    })
}

//! Filesystem helpers shared by the state store and the page writer.

use std::io::Write;
use std::path::Path;

use crate::error::{PaperDiscError, Result};

/// Write `content` to `target` so readers see either the old file or the
/// complete new one.
///
/// The data goes to a hidden temp file in the same directory, is fsynced, and
/// is then renamed over the target.
pub fn write_atomic(target: &Path, content: &[u8]) -> Result<()> {
    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| PaperDiscError::io(dir, e))?;

    let file_name = target
        .file_name()
        .ok_or_else(|| PaperDiscError::validation(format!("not a file path: {}", target.display())))?
        .to_string_lossy();
    let temp = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::now_v7()));

    let written = (|| -> std::io::Result<()> {
        let mut file = std::fs::File::create(&temp)?;
        file.write_all(content)?;
        file.sync_all()
    })();

    if let Err(e) = written {
        let _ = std::fs::remove_file(&temp);
        return Err(PaperDiscError::io(&temp, e));
    }

    std::fs::rename(&temp, target).map_err(|e| {
        let _ = std::fs::remove_file(&temp);
        PaperDiscError::io(target, e)
    })
}

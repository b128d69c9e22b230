use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// Replace `path` with `bytes` so that readers see either the old or the new
/// content, never a mix.
///
/// Writes a temp file in the same directory, fsyncs it, renames it over
/// `path`, then fsyncs the directory so the rename itself is durable.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
    tmp.as_file_mut()
        .write_all(bytes)
        .map_err(|e| StoreError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| StoreError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| StoreError::io(path, e.error))?;
    sync_dir(dir)?;

    debug!(path = %path.display(), len = bytes.len(), "atomic replace");
    Ok(())
}

/// Flush directory metadata (renames, creations) to disk.
#[cfg(unix)]
pub fn sync_dir(dir: &Path) -> StoreResult<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| StoreError::io(dir, e))
}

/// Directories cannot be opened for sync on this platform; rename is already durable.
#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) -> StoreResult<()> {
    Ok(())
}

//! Cross-process exclusion per (issuer, environment).
//!
//! An advisory `fs2` lock on `<identity dir>/.lock`. Each acquire opens its own
//! file handle, so two guards in one process exclude each other as well.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use emissor_types::LedgerIdentity;

use crate::error::{StoreError, StoreResult};
use crate::layout::IdentityPaths;

/// Proof that the caller holds the exclusive lock for one identity.
///
/// Allocation and ledger mutation take `&IdentityGuard`. Released on drop.
#[derive(Debug)]
pub struct IdentityGuard {
    file: File,
    identity: LedgerIdentity,
    path: PathBuf,
}

impl IdentityGuard {
    /// Block until the lock is free.
    pub fn acquire(paths: &IdentityPaths) -> StoreResult<Self> {
        let file = open_lock_file(paths)?;
        file.lock_exclusive().map_err(|e| StoreError::Lock {
            path: paths.lock.clone(),
            source: e,
        })?;
        Self::locked(file, paths)
    }

    /// Fail with [`StoreError::Busy`] instead of waiting.
    pub fn try_acquire(paths: &IdentityPaths) -> StoreResult<Self> {
        let file = open_lock_file(paths)?;
        if file.try_lock_exclusive().is_err() {
            return Err(StoreError::Busy {
                identity: paths.identity.clone(),
                path: paths.lock.clone(),
            });
        }
        Self::locked(file, paths)
    }

    fn locked(mut file: File, paths: &IdentityPaths) -> StoreResult<Self> {
        // Owner pid, for operators inspecting a stuck lock.
        file.set_len(0)
            .and_then(|_| writeln!(file, "{}", std::process::id()))
            .map_err(|e| StoreError::io(&paths.lock, e))?;
        debug!(identity = %paths.identity, "identity lock acquired");
        Ok(Self {
            file,
            identity: paths.identity.clone(),
            path: paths.lock.clone(),
        })
    }

    pub fn identity(&self) -> &LedgerIdentity {
        &self.identity
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this guard locks the given identity's files.
    pub fn covers(&self, paths: &IdentityPaths) -> bool {
        self.identity == paths.identity && self.path == paths.lock
    }
}

impl Drop for IdentityGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        debug!(identity = %self.identity, "identity lock released");
    }
}

fn open_lock_file(paths: &IdentityPaths) -> StoreResult<File> {
    paths.ensure_dir()?;
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&paths.lock)
        .map_err(|e| StoreError::Lock {
            path: paths.lock.clone(),
            source: e,
        })
}

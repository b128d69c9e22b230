use std::io;
use std::path::PathBuf;

use emissor_types::LedgerIdentity;

/// Errors from the filesystem layer shared by the allocator and the ledger.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O failure on a store file or directory.
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The identity lock file could not be opened or locked.
    #[error("cannot lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Another process holds the identity lock (non-blocking acquire only).
    #[error("{identity} is locked by another process ({path})")]
    Busy {
        identity: LedgerIdentity,
        path: PathBuf,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn hint(&self) -> &'static str {
        match self {
            Self::Io { .. } => "check that the data directory exists and is writable",
            Self::Lock { .. } => "check permissions on the data directory's lock file",
            Self::Busy { .. } => "another emissor process is working on this issuer; wait for it to finish",
        }
    }
}

/// Convenience alias used throughout the store crate.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors from the sequence allocator. The counter is never reset to recover.
#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The counter file exists but does not parse.
    #[error("sequence store {path} is unreadable: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// The counter file belongs to a different (issuer, environment).
    #[error("sequence store {path} belongs to {found}, not {expected}")]
    IdentityMismatch {
        path: PathBuf,
        expected: LedgerIdentity,
        found: String,
    },

    /// The guard passed in locks a different data directory.
    #[error("lock {lock_path} for {held} does not cover {expected_path}")]
    WrongLock {
        held: LedgerIdentity,
        lock_path: PathBuf,
        expected_path: PathBuf,
    },

    /// The 15-digit sequence field is full.
    #[error("sequence for {identity} is exhausted at {last}")]
    Exhausted { identity: LedgerIdentity, last: u64 },

    /// An administrative advance would move the counter backwards.
    #[error("cannot move sequence for {identity} from {current} back to {requested}")]
    Backwards {
        identity: LedgerIdentity,
        current: u64,
        requested: u64,
    },
}

impl AllocationError {
    pub fn hint(&self) -> &'static str {
        match self {
            Self::Store(e) => e.hint(),
            Self::Corrupt { .. } => {
                "restore sequence.json from backup or set it with `emissor sequence set` after checking the ledger"
            }
            Self::IdentityMismatch { .. } => "the data directory was copied between issuers; restore the right sequence.json",
            Self::WrongLock { .. } => "acquire the identity lock from the same data directory",
            Self::Exhausted { .. } => "use a new series for this issuer",
            Self::Backwards { .. } => "the counter only moves forward; pick a value at or above the current one",
        }
    }
}

use std::path::PathBuf;

use emissor_store::StoreError;
use emissor_types::{LedgerIdentity, SequenceNumber};

/// Errors produced by ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The ledger file stopped parsing after it was opened.
    #[error("ledger {path} is unreadable: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("ledger {path} belongs to {found}, not {expected}")]
    IdentityMismatch {
        path: PathBuf,
        expected: LedgerIdentity,
        found: String,
    },

    #[error("ledger writes for {identity} require its identity lock")]
    NotLocked { identity: LedgerIdentity },

    #[error("sequence {0} already has a ledger entry")]
    DuplicateSequence(SequenceNumber),

    #[error("no ledger entry for sequence {0}")]
    UnknownSequence(SequenceNumber),

    #[error("sequence {sequence} is already {status}; only drafts can be resolved")]
    AlreadyResolved {
        sequence: SequenceNumber,
        status: &'static str,
    },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl LedgerError {
    pub fn hint(&self) -> &'static str {
        match self {
            Self::Store(e) => e.hint(),
            Self::Corrupt { .. } => "restart to move the damaged ledger aside, then review the backup",
            Self::IdentityMismatch { .. } => "the data directory was copied between issuers; restore the right ledger.json",
            Self::NotLocked { .. } => "acquire the identity lock before writing to the ledger",
            Self::DuplicateSequence(_) => "check sequence.json; the counter is behind the ledger",
            Self::UnknownSequence(_) => "the entry was never drafted; run `emissor audit`",
            Self::AlreadyResolved { .. } => "an entry is resolved only once; emit a new document instead",
            Self::Serialization(_) => "report this as a bug",
        }
    }
}

/// Convenience alias used throughout the ledger crate.
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

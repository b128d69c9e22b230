use emissor_store::IdentityGuard;
use emissor_types::{ClientId, LedgerIdentity, SequenceNumber};

use crate::error::LedgerError;
use crate::records::{LedgerEntry, Resolution};

/// Write boundary. Every mutation requires the identity lock.
pub trait LedgerWriter: Send + Sync {
    /// Insert a new `Draft` entry; its sequence must not exist yet.
    fn append_draft(&self, guard: &IdentityGuard, entry: LedgerEntry) -> Result<(), LedgerError>;

    /// Resolve a `Draft` entry. Resolving twice is an error.
    fn update_status(
        &self,
        guard: &IdentityGuard,
        sequence: SequenceNumber,
        resolution: Resolution,
    ) -> Result<LedgerEntry, LedgerError>;
}

/// Read boundary. Reads take no lock.
pub trait LedgerReader: Send + Sync {
    fn identity(&self) -> &LedgerIdentity;

    /// All entries ordered by sequence.
    fn load_all(&self) -> Result<Vec<LedgerEntry>, LedgerError>;

    fn get(&self, sequence: SequenceNumber) -> Result<Option<LedgerEntry>, LedgerError>;

    /// Most recent entry (highest sequence) for `client`, whatever its status.
    ///
    /// `None` means no history and is a normal outcome.
    fn last_override(&self, client: &ClientId) -> Result<Option<LedgerEntry>, LedgerError> {
        Ok(self
            .load_all()?
            .into_iter()
            .rev()
            .find(|e| &e.client.id == client))
    }

    /// Entries still waiting for a resolution.
    fn open_drafts(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self.load_all()?.into_iter().filter(LedgerEntry::is_draft).collect())
    }
}

/// A ledger that can be both read and written.
pub trait Ledger: LedgerReader + LedgerWriter {}

impl<T: LedgerReader + LedgerWriter> Ledger for T {}

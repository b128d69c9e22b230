use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use emissor_store::{sync_dir, write_atomic, IdentityGuard, IdentityPaths, StoreError};
use emissor_types::{Environment, IssuerId, LedgerIdentity, SequenceNumber};

use crate::error::{LedgerError, LedgerResult};
use crate::records::{EntryStatus, LedgerEntry, Resolution};
use crate::traits::{LedgerReader, LedgerWriter};

const FORMAT_VERSION: u32 = 1;

/// On-disk layout: `{ "version": 1, "issuer", "environment", "entries": [...] }`.
#[derive(Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    issuer: IssuerId,
    environment: Environment,
    entries: Vec<LedgerEntry>,
}

/// Set on a [`FileLedger`] whose store failed to parse when it was opened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorruptionNotice {
    /// Where the unreadable bytes were moved.
    pub backup_path: PathBuf,
    pub reason: String,
}

/// Ledger persisted as one JSON document, rewritten atomically on every mutation.
///
/// Reads go to disk each time, so a handle always observes the last complete
/// write, including writes from other processes.
#[derive(Debug)]
pub struct FileLedger {
    paths: IdentityPaths,
    corruption: Option<CorruptionNotice>,
}

impl FileLedger {
    /// Open the ledger for `paths.identity`.
    ///
    /// A store that does not parse is renamed to `<ledger>.corrupt-<timestamp>`
    /// and the ledger starts empty with [`corruption`](Self::corruption) set.
    /// A store that parses but belongs to another identity is an error.
    pub fn open(paths: IdentityPaths) -> LedgerResult<Self> {
        let mut ledger = Self {
            paths,
            corruption: None,
        };

        match ledger.read() {
            Ok(entries) => {
                debug!(identity = %ledger.paths.identity, entries = entries.len(), "ledger opened");
            }
            Err(LedgerError::Corrupt { .. }) => {
                // Re-check under the lock: another process may have rewritten it.
                let _guard = IdentityGuard::acquire(&ledger.paths)?;
                if let Err(LedgerError::Corrupt { reason, .. }) = ledger.read() {
                    let backup_path = ledger.quarantine()?;
                    warn!(
                        identity = %ledger.paths.identity,
                        backup = %backup_path.display(),
                        reason = %reason,
                        "ledger unreadable; moved aside and starting empty"
                    );
                    ledger.corruption = Some(CorruptionNotice {
                        backup_path,
                        reason,
                    });
                }
            }
            Err(e) => return Err(e),
        }

        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.paths.ledger
    }

    pub fn paths(&self) -> &IdentityPaths {
        &self.paths
    }

    /// `Some` when the store was unreadable at open and has been moved aside.
    pub fn corruption(&self) -> Option<&CorruptionNotice> {
        self.corruption.as_ref()
    }

    pub fn is_corrupted(&self) -> bool {
        self.corruption.is_some()
    }

    fn read(&self) -> LedgerResult<Vec<LedgerEntry>> {
        let path = &self.paths.ledger;
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::Io {
                    path: path.clone(),
                    source: e,
                }
                .into())
            }
        };

        let corrupt = |reason: String| LedgerError::Corrupt {
            path: path.clone(),
            reason,
        };
        let file: LedgerFile = serde_json::from_slice(&raw).map_err(|e| corrupt(e.to_string()))?;
        if file.version != FORMAT_VERSION {
            return Err(corrupt(format!("unsupported format version {}", file.version)));
        }

        let identity = &self.paths.identity;
        if file.issuer != identity.issuer || file.environment != identity.environment {
            return Err(LedgerError::IdentityMismatch {
                path: path.clone(),
                expected: identity.clone(),
                found: format!("{}/{}", file.issuer, file.environment),
            });
        }

        let mut entries = file.entries;
        entries.sort_by_key(|e| e.sequence);
        if let Some(pair) = entries.windows(2).find(|w| w[0].sequence == w[1].sequence) {
            return Err(corrupt(format!("sequence {} appears twice", pair[0].sequence)));
        }
        Ok(entries)
    }

    fn write(&self, entries: Vec<LedgerEntry>) -> LedgerResult<()> {
        let identity = &self.paths.identity;
        let file = LedgerFile {
            version: FORMAT_VERSION,
            issuer: identity.issuer.clone(),
            environment: identity.environment,
            entries,
        };
        let mut bytes =
            serde_json::to_vec_pretty(&file).map_err(|e| LedgerError::Serialization(e.to_string()))?;
        bytes.push(b'\n');
        write_atomic(&self.paths.ledger, &bytes)?;
        Ok(())
    }

    fn quarantine(&self) -> LedgerResult<PathBuf> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let name = format!("{}.corrupt-{stamp}", emissor_store::DataLayout::LEDGER_FILE);
        let backup = self.paths.dir.join(name);
        fs::rename(&self.paths.ledger, &backup).map_err(|e| StoreError::Io {
            path: self.paths.ledger.clone(),
            source: e,
        })?;
        sync_dir(&self.paths.dir)?;
        Ok(backup)
    }

    fn check_guard(&self, guard: &IdentityGuard) -> LedgerResult<()> {
        if guard.covers(&self.paths) {
            Ok(())
        } else {
            Err(LedgerError::NotLocked {
                identity: self.paths.identity.clone(),
            })
        }
    }
}

impl LedgerWriter for FileLedger {
    fn append_draft(&self, guard: &IdentityGuard, entry: LedgerEntry) -> LedgerResult<()> {
        self.check_guard(guard)?;
        let mut entries = self.read()?;
        if entries.iter().any(|e| e.sequence == entry.sequence) {
            return Err(LedgerError::DuplicateSequence(entry.sequence));
        }
        let sequence = entry.sequence;
        let draft = LedgerEntry {
            status: EntryStatus::Draft,
            updated_at: None,
            ..entry
        };
        let at = entries.partition_point(|e| e.sequence < sequence);
        entries.insert(at, draft);
        self.write(entries)?;
        info!(identity = %self.paths.identity, seq = sequence.get(), "draft recorded");
        Ok(())
    }

    fn update_status(
        &self,
        guard: &IdentityGuard,
        sequence: SequenceNumber,
        resolution: Resolution,
    ) -> LedgerResult<LedgerEntry> {
        self.check_guard(guard)?;
        let mut entries = self.read()?;
        let entry = entries
            .iter_mut()
            .find(|e| e.sequence == sequence)
            .ok_or(LedgerError::UnknownSequence(sequence))?;
        if !entry.is_draft() {
            return Err(LedgerError::AlreadyResolved {
                sequence,
                status: entry.status.label(),
            });
        }
        entry.updated_at = Some(resolution.at());
        entry.status = resolution.into();
        let updated = entry.clone();
        self.write(entries)?;
        info!(
            identity = %self.paths.identity,
            seq = sequence.get(),
            status = updated.status.label(),
            "entry resolved"
        );
        Ok(updated)
    }
}

impl LedgerReader for FileLedger {
    fn identity(&self) -> &LedgerIdentity {
        &self.paths.identity
    }

    fn load_all(&self) -> LedgerResult<Vec<LedgerEntry>> {
        self.read()
    }

    fn get(&self, sequence: SequenceNumber) -> LedgerResult<Option<LedgerEntry>> {
        Ok(self.read()?.into_iter().find(|e| e.sequence == sequence))
    }
}

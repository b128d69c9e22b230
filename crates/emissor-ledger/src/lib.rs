//! Durable ledger of allocated document numbers.
//!
//! Exactly one [`LedgerEntry`] exists per allocated sequence number that
//! reached the draft stage. Entries move `Draft → Confirmed | Failed` once:
//! [`LedgerWriter::update_status`] takes a [`Resolution`], which has no
//! `Draft` variant, and a second resolution is rejected.
//!
//! - [`LedgerWriter`] / [`LedgerReader`] trait boundaries
//! - [`FileLedger`]: one JSON file per identity, atomically replaced on
//!   every mutation, with corruption quarantine on open

pub mod error;
pub mod file;
pub mod records;
pub mod traits;

pub use error::{LedgerError, LedgerResult};
pub use file::{CorruptionNotice, FileLedger};
pub use records::{
    ClientRef, Confirmation, EntryStatus, FailureDetail, FailureKind, LedgerEntry, Resolution,
};
pub use traits::{Ledger, LedgerReader, LedgerWriter};

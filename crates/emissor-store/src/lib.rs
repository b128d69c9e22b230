//! Durable per-identity state.
//!
//! Everything an identity (issuer, environment) owns on disk lives under
//! `<data>/<issuer>/<env>/`:
//!
//! - `sequence.json`: the allocator's counter and the ranges skipped by `advance_to`
//! - `ledger.json`: the ledger (written by `emissor-ledger` through [`write_atomic`])
//! - `.lock`: the advisory lock behind [`IdentityGuard`]
//! - `issued/`: NFS-e documents returned on confirmation
//!
//! Writers must hold the identity's [`IdentityGuard`]; readers take no lock
//! and rely on atomic replacement.

pub mod atomic;
pub mod error;
pub mod layout;
pub mod lock;
pub mod sequence;

pub use atomic::{sync_dir, write_atomic};
pub use error::{AllocationError, StoreError, StoreResult};
pub use layout::{DataLayout, IdentityPaths};
pub use lock::IdentityGuard;
pub use sequence::{SequenceAllocator, SkippedRange};

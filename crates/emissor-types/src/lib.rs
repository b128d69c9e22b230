//! Foundation types for the emission pipeline.
//!
//! Every other emissor crate depends on `emissor-types`.
//!
//! # Key Types
//!
//! - [`LedgerIdentity`]: (issuer, environment) scope of a counter and a ledger
//! - [`SequenceNumber`]: allocated document number
//! - [`DocumentId`]: 45-character identifier derived from issuer and sequence
//! - [`DocumentModel`]: caller-owned input to the document builder
//! - [`Money`]: fixed-point amount, never floating point

pub mod canonical;
pub mod document;
pub mod error;
pub mod identity;
pub mod money;
pub mod sequence;

pub use canonical::CanonicalDocument;
pub use document::{
    Client, DocumentModel, ForeignAddress, Intermediary, Invoice, InvoiceLine, Issuer, ServiceInfo,
};
pub use error::TypeError;
pub use identity::{ClientId, Environment, IssuerId, LedgerIdentity};
pub use money::Money;
pub use sequence::{DocumentId, SequenceNumber};

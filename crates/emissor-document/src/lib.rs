//! Canonical document construction.
//!
//! The [`DocumentBuilder`] turns a caller-owned [`DocumentModel`] and an
//! allocated [`SequenceNumber`] into the unsigned canonical XML the signer
//! consumes. Building is pure: the same inputs always produce the same bytes.
//!
//! Field-format rules live behind the [`FieldValidator`] trait so that the
//! orchestrator can reject a model before any number is spent on it.
//!
//! [`DocumentModel`]: emissor_types::DocumentModel
//! [`SequenceNumber`]: emissor_types::SequenceNumber

pub mod builder;
pub mod error;
pub mod validator;
pub mod xml;

pub use builder::{DocumentBuilder, LAYOUT_VERSION, NFSE_NAMESPACE, OVERRIDE_KEYS};
pub use error::{BuildError, FieldError};
pub use validator::{FieldValidator, FormatValidator, ValidatorChain};
pub use xml::XmlWriter;

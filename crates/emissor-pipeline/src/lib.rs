//! Emission pipeline.
//!
//! ```text
//! prepare: validate → lock → allocate → build → sign → Draft → unlock
//! submit:  gzip+base64 → send (retrying no-response only) → parse → Confirmed | Failed
//!          → issued NFS-e saved under `issued/`
//! ```
//!
//! The [`Orchestrator`] is the only component that resolves ledger entries.
//! A [`PreparedSubmission`] is consumed by `submit` or `abandon`, so every
//! draft gets at most one attempt chain. Once a draft exists, `submit`
//! always ends in a ledger update; it returns `Err` only when that update
//! could not be written.

pub mod audit;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod response;
pub mod wire;

pub use audit::AuditReport;
pub use config::{EndpointConfig, OrchestratorConfig};
pub use error::{PipelineError, PipelineResult, PrepareError, SubmitError};
pub use orchestrator::{
    Orchestrator, PipelineComponents, PreparedSubmission, SubmissionOutcome, SubmissionPhase,
};
pub use response::{parse_submission_response, AcceptedResponse, ProtocolContractError};
pub use wire::{decode_document, encode_document, WireError};

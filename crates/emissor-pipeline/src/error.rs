use std::path::PathBuf;

use emissor_crypto::{CertificateError, CredentialError, SignError};
use emissor_document::BuildError;
use emissor_ledger::{LedgerError, Resolution};
use emissor_store::{AllocationError, StoreError};
use emissor_types::SequenceNumber;

/// Why `prepare` produced no draft.
///
/// The first four variants are raised before a number is allocated. The
/// `*AfterAllocation` variants consumed a number that now shows up as an
/// audit gap.
#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    #[error(transparent)]
    Invalid(#[from] BuildError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Certificate(#[from] CertificateError),

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("document {sequence} could not be built: {source}")]
    BuildAfterAllocation {
        sequence: SequenceNumber,
        #[source]
        source: BuildError,
    },

    #[error("document {sequence} could not be signed: {source}")]
    SignAfterAllocation {
        sequence: SequenceNumber,
        #[source]
        source: SignError,
    },

    #[error("draft for {sequence} could not be recorded: {source}")]
    DraftAfterAllocation {
        sequence: SequenceNumber,
        #[source]
        source: LedgerError,
    },
}

impl PrepareError {
    /// Number that was consumed without a draft, if any.
    pub fn consumed_sequence(&self) -> Option<SequenceNumber> {
        match self {
            Self::BuildAfterAllocation { sequence, .. }
            | Self::SignAfterAllocation { sequence, .. }
            | Self::DraftAfterAllocation { sequence, .. } => Some(*sequence),
            _ => None,
        }
    }

    pub fn hint(&self) -> &'static str {
        match self {
            Self::Invalid(e) => e.hint(),
            Self::Credential(e) => e.hint(),
            Self::Certificate(e) => e.hint(),
            Self::Allocation(e) => e.hint(),
            Self::Store(e) => e.hint(),
            Self::BuildAfterAllocation { .. } => {
                "the number is skipped and will be listed by `emissor audit`; fix the issuer series or code and emit again"
            }
            Self::SignAfterAllocation { source, .. } => match source {
                SignError::Certificate(e) => e.hint(),
                SignError::MissingRootClose(_) => "report this as a bug",
            },
            Self::DraftAfterAllocation { source, .. } => source.hint(),
        }
    }
}

/// `submit` could not record its outcome. The outcome itself is carried so
/// the operator can still see what the service said.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("outcome for {sequence} could not be recorded: {source}")]
    Ledger {
        sequence: SequenceNumber,
        outcome: Box<Resolution>,
        #[source]
        source: LedgerError,
    },

    #[error("outcome for {sequence} could not be recorded: {source}")]
    Lock {
        sequence: SequenceNumber,
        outcome: Box<Resolution>,
        #[source]
        source: StoreError,
    },

    #[error("submission task for {sequence} stopped: {reason}")]
    Interrupted {
        sequence: SequenceNumber,
        reason: String,
    },
}

impl SubmitError {
    pub fn hint(&self) -> &'static str {
        match self {
            Self::Ledger { source, .. } => source.hint(),
            Self::Lock { source, .. } => source.hint(),
            Self::Interrupted { .. } => "the draft stays open; run `emissor audit` and look the document up remotely",
        }
    }
}

/// Errors from ledger-facing operations other than prepare and submit.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cannot write {path}: {source}")]
    Export {
        path: PathBuf,
        #[source]
        source: StoreError,
    },
}

impl PipelineError {
    pub fn hint(&self) -> &'static str {
        match self {
            Self::Ledger(e) => e.hint(),
            Self::Allocation(e) => e.hint(),
            Self::Store(e) => e.hint(),
            Self::Export { .. } => "check that the export directory is writable",
        }
    }
}

/// Convenience alias used throughout the pipeline crate.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

use std::time::Duration;

use crate::sender::SendFailure;

/// Why a call did not deliver a success response.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No response and the policy does not retry this outcome.
    #[error("no response from {endpoint}: {failure}")]
    NoResponse {
        endpoint: String,
        attempts: u32,
        failure: SendFailure,
    },

    /// Every attempt ended without a response.
    #[error("no response from {endpoint} after {attempts} attempt(s) in {elapsed:?}: {last}")]
    TimeoutExceeded {
        endpoint: String,
        attempts: u32,
        elapsed: Duration,
        last: SendFailure,
    },

    /// The service answered with a non-success status.
    #[error("{endpoint} answered {status}: {body}")]
    ResponseReceived {
        endpoint: String,
        status: u16,
        body: String,
        attempts: u32,
    },
}

impl TransportError {
    pub fn endpoint(&self) -> &str {
        match self {
            Self::NoResponse { endpoint, .. }
            | Self::TimeoutExceeded { endpoint, .. }
            | Self::ResponseReceived { endpoint, .. } => endpoint,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::NoResponse { attempts, .. }
            | Self::TimeoutExceeded { attempts, .. }
            | Self::ResponseReceived { attempts, .. } => *attempts,
        }
    }

    /// `true` when nothing was ever heard back.
    pub fn is_no_response(&self) -> bool {
        !matches!(self, Self::ResponseReceived { .. })
    }

    pub fn hint(&self) -> &'static str {
        match self {
            Self::NoResponse { .. } | Self::TimeoutExceeded { .. } => {
                "check network access to the endpoint; the service may have processed the document, look it up before emitting again"
            }
            Self::ResponseReceived { status, .. } if (400..500).contains(status) => {
                "the service rejected the document; fix the reported problem and emit a new one"
            }
            Self::ResponseReceived { .. } => {
                "the service reported an internal error; check its status page before emitting again"
            }
        }
    }
}

/// Convenience alias used throughout the transport crate.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

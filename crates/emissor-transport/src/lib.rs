//! Retrying transport.
//!
//! Every attempt is classified as *no response* (nothing came back) or
//! *response received* (a status line arrived). Non-idempotent submissions
//! only retry the former: once the service has answered, sending again could
//! issue a second invoice.
//!
//! - [`RetryPolicy`] and [`next_action`]: pure backoff and retry decision
//! - [`Sender`]: the network seam, with [`HttpSender`] and [`ScriptedSender`]
//! - [`ResilientTransport`]: runs a request under a policy

pub mod error;
pub mod http;
pub mod policy;
pub mod resilient;
pub mod sender;

pub use error::{TransportError, TransportResult};
pub use http::HttpSender;
pub use policy::{next_action, AttemptOutcome, NextAction, RetryPolicy};
pub use resilient::{Delivered, ResilientTransport};
pub use sender::{Method, RawResponse, Request, ScriptedSender, SendFailure, Sender};

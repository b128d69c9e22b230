use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

/// HTTP verb of a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One outbound call, reused unchanged across attempts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub endpoint: String,
    pub body: Vec<u8>,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl Request {
    /// `POST` with a JSON body.
    pub fn post_json(endpoint: impl Into<String>, body: Vec<u8>, timeout: Duration) -> Self {
        Self {
            method: Method::Post,
            endpoint: endpoint.into(),
            body,
            timeout,
        }
    }

    pub fn get(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: Method::Get,
            endpoint: endpoint.into(),
            body: Vec::new(),
            timeout,
        }
    }
}

/// Status and body of whatever the remote side answered.
#[derive(Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawResponse")
            .field("status", &self.status)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// An attempt that ended before any status line arrived.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SendFailure {
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("name resolution failed: {0}")]
    Dns(String),

    #[error("timed out before any response")]
    Timeout,

    #[error("request failed before any response: {0}")]
    Other(String),
}

/// The seam between the retry loop and the network.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, request: &Request) -> Result<RawResponse, SendFailure>;
}

/// Replays queued outcomes in order and records every request it sees.
///
/// Once the script runs out it keeps answering with a refused connection.
#[derive(Default)]
pub struct ScriptedSender {
    script: Mutex<VecDeque<Result<RawResponse, SendFailure>>>,
    seen: Mutex<Vec<Request>>,
}

impl ScriptedSender {
    pub fn new(script: impl IntoIterator<Item = Result<RawResponse, SendFailure>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Number of `send` calls so far.
    pub fn calls(&self) -> usize {
        self.seen.lock().expect("sender mutex poisoned").len()
    }

    pub fn requests(&self) -> Vec<Request> {
        self.seen.lock().expect("sender mutex poisoned").clone()
    }
}

#[async_trait]
impl Sender for ScriptedSender {
    async fn send(&self, request: &Request) -> Result<RawResponse, SendFailure> {
        self.seen
            .lock()
            .expect("sender mutex poisoned")
            .push(request.clone());
        self.script
            .lock()
            .expect("sender mutex poisoned")
            .pop_front()
            .unwrap_or_else(|| Err(SendFailure::ConnectionRefused("script exhausted".into())))
    }
}

use std::error::Error as _;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::sender::{Method, RawResponse, Request, SendFailure, Sender};

/// [`Sender`] over HTTPS.
///
/// Failures before a status line (connect, DNS, timeout) map to
/// [`SendFailure`]. Once a status line arrives the attempt is a response,
/// even if reading the body fails afterwards.
#[derive(Clone)]
pub struct HttpSender {
    client: reqwest::Client,
}

impl HttpSender {
    pub fn new(connect_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Self::builder(connect_timeout).build()?;
        Ok(Self { client })
    }

    /// Sender that presents `identity` as its TLS client certificate.
    ///
    /// The national API authenticates the issuer by mutual TLS.
    pub fn with_identity(connect_timeout: Duration, identity: reqwest::Identity) -> Result<Self, reqwest::Error> {
        let client = Self::builder(connect_timeout).identity(identity).build()?;
        Ok(Self { client })
    }

    /// Parse a PEM bundle holding the client certificate chain and its private key.
    pub fn identity_from_pem(pem: &[u8]) -> Result<reqwest::Identity, reqwest::Error> {
        reqwest::Identity::from_pem(pem)
    }

    fn builder(connect_timeout: Duration) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("emissor/", env!("CARGO_PKG_VERSION")))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Sender for HttpSender {
    async fn send(&self, request: &Request) -> Result<RawResponse, SendFailure> {
        let builder = match request.method {
            Method::Get => self.client.get(&request.endpoint),
            Method::Post => self
                .client
                .post(&request.endpoint)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(request.body.clone()),
        };

        let response = builder
            .timeout(request.timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status().as_u16();
        let body = match response.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => {
                debug!(endpoint = %request.endpoint, status, error = %e, "response body unreadable");
                Vec::new()
            }
        };
        Ok(RawResponse { status, body })
    }
}

fn classify(err: reqwest::Error) -> SendFailure {
    if err.is_timeout() {
        return SendFailure::Timeout;
    }
    let detail = error_chain(&err);
    if err.is_connect() {
        if detail.to_ascii_lowercase().contains("dns") {
            SendFailure::Dns(detail)
        } else {
            SendFailure::ConnectionRefused(detail)
        }
    } else {
        SendFailure::Other(detail)
    }
}

fn error_chain(err: &reqwest::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

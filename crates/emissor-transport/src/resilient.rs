use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, warn};

use crate::error::{TransportError, TransportResult};
use crate::policy::{next_action, AttemptOutcome, NextAction, RetryPolicy};
use crate::sender::{RawResponse, Request, Sender};

/// A success response plus how much it took to get it.
#[derive(Clone, Debug)]
pub struct Delivered {
    pub response: RawResponse,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Drives a [`Sender`] under a [`RetryPolicy`].
#[derive(Clone)]
pub struct ResilientTransport {
    sender: Arc<dyn Sender>,
}

impl ResilientTransport {
    pub fn new(sender: Arc<dyn Sender>) -> Self {
        Self { sender }
    }

    /// Send `request` until the policy says stop.
    ///
    /// Returns `Ok` only for a 2xx response. A non-success response is
    /// [`TransportError::ResponseReceived`]; running out of attempts without
    /// any response is [`TransportError::TimeoutExceeded`].
    pub async fn call(&self, request: &Request, policy: &RetryPolicy) -> TransportResult<Delivered> {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let result = self.sender.send(request).await;
            let outcome = match &result {
                Ok(resp) => AttemptOutcome::Response {
                    status: resp.status,
                },
                Err(failure) => AttemptOutcome::NoResponse(failure.clone()),
            };

            match (next_action(attempts, &outcome, policy), result) {
                (NextAction::Retry { backoff }, _) => {
                    let delay = backoff + jitter(policy.jitter);
                    warn!(
                        endpoint = %request.endpoint,
                        attempt = attempts,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        outcome = ?outcome,
                        "attempt failed; retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                (_, Ok(response)) => {
                    let elapsed = started.elapsed();
                    debug!(
                        endpoint = %request.endpoint,
                        status = response.status,
                        attempts,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "response received"
                    );
                    if !response.is_success() {
                        return Err(TransportError::ResponseReceived {
                            endpoint: request.endpoint.clone(),
                            status: response.status,
                            body: response.body_text(),
                            attempts,
                        });
                    }
                    return Ok(Delivered {
                        response,
                        attempts,
                        elapsed,
                    });
                }
                (_, Err(last)) => {
                    let elapsed = started.elapsed();
                    warn!(endpoint = %request.endpoint, attempts, "giving up without a response");
                    if attempts >= policy.max_attempts {
                        return Err(TransportError::TimeoutExceeded {
                            endpoint: request.endpoint.clone(),
                            attempts,
                            elapsed,
                            last,
                        });
                    }
                    return Err(TransportError::NoResponse {
                        endpoint: request.endpoint.clone(),
                        attempts,
                        failure: last,
                    });
                }
            }
        }
    }
}

fn jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    max.mul_f64(rand::thread_rng().gen::<f64>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::{ScriptedSender, SendFailure};

    fn request() -> Request {
        Request::post_json("https://sefin.example/nfse", b"{}".to_vec(), Duration::from_secs(5))
    }

    fn refused() -> Result<RawResponse, SendFailure> {
        Err(SendFailure::ConnectionRefused("refused".into()))
    }

    fn transport(sender: &Arc<ScriptedSender>) -> ResilientTransport {
        ResilientTransport::new(Arc::clone(sender) as Arc<dyn Sender>)
    }

    #[tokio::test]
    async fn succeeds_after_no_responses() {
        let sender = Arc::new(ScriptedSender::new([
            refused(),
            Err(SendFailure::Timeout),
            refused(),
            Ok(RawResponse::new(201, "{}")),
        ]));
        let policy = RetryPolicy::submission().with_max_attempts(5).without_delays();
        let delivered = transport(&sender).call(&request(), &policy).await.unwrap();
        assert_eq!(delivered.attempts, 4);
        assert_eq!(delivered.response.status, 201);
        assert_eq!(sender.calls(), 4);
    }

    #[tokio::test]
    async fn server_error_is_not_retried_on_submission() {
        let sender = Arc::new(ScriptedSender::new([
            Ok(RawResponse::new(500, "boom")),
            Ok(RawResponse::new(201, "{}")),
        ]));
        let policy = RetryPolicy::submission().without_delays();
        let err = transport(&sender).call(&request(), &policy).await.unwrap_err();
        assert_eq!(
            err,
            TransportError::ResponseReceived {
                endpoint: "https://sefin.example/nfse".into(),
                status: 500,
                body: "boom".into(),
                attempts: 1,
            }
        );
        assert_eq!(sender.calls(), 1);
    }

    #[tokio::test]
    async fn exhausting_attempts_is_timeout_exceeded() {
        let sender = Arc::new(ScriptedSender::new([refused(), refused(), refused()]));
        let policy = RetryPolicy::submission().without_delays();
        let err = transport(&sender).call(&request(), &policy).await.unwrap_err();
        assert!(matches!(err, TransportError::TimeoutExceeded { attempts: 3, .. }));
        assert!(err.is_no_response());
        assert_eq!(sender.calls(), 3);
    }

    #[tokio::test]
    async fn policy_without_no_response_retry_stops_at_once() {
        let sender = Arc::new(ScriptedSender::new([refused()]));
        let mut policy = RetryPolicy::submission().without_delays();
        policy.retry_no_response = false;
        let err = transport(&sender).call(&request(), &policy).await.unwrap_err();
        assert!(matches!(err, TransportError::NoResponse { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn query_retries_gateway_errors() {
        let sender = Arc::new(ScriptedSender::new([
            Ok(RawResponse::new(503, "")),
            Ok(RawResponse::new(429, "")),
            Ok(RawResponse::new(200, "ok")),
        ]));
        let policy = RetryPolicy::query().without_delays();
        let delivered = transport(&sender).call(&request(), &policy).await.unwrap();
        assert_eq!(delivered.attempts, 3);
        assert_eq!(delivered.response.body_text(), "ok");
    }

    #[tokio::test]
    async fn waits_between_attempts() {
        let sender = Arc::new(ScriptedSender::new([refused(), Ok(RawResponse::new(200, ""))]));
        let mut policy = RetryPolicy::submission();
        policy.base_delay = Duration::from_millis(40);
        policy.jitter = Duration::ZERO;
        let delivered = transport(&sender).call(&request(), &policy).await.unwrap();
        assert!(delivered.elapsed >= Duration::from_millis(40));
    }

    #[test]
    fn jitter_stays_in_range() {
        for _ in 0..100 {
            assert!(jitter(Duration::from_millis(250)) <= Duration::from_millis(250));
        }
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
    }
}

use std::time::Duration;

use crate::sender::SendFailure;

/// What a single attempt produced, as far as retrying is concerned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Nothing came back: refused, DNS failure, or timed out before any byte.
    NoResponse(SendFailure),
    /// A status line arrived. The request may have taken effect.
    Response { status: u16 },
}

/// Decision taken after an attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NextAction {
    /// Try again after `backoff` (jitter is added by the caller).
    Retry { backoff: Duration },
    /// Hand the response to the caller, whatever its status.
    Deliver,
    /// Stop: no response and no retries left (or none allowed).
    GiveUp,
}

/// Backoff and classification rules for one kind of call.
///
/// Delay before retry `n` (0-based) is
/// `min(base_delay * multiplier^n, max_delay) + uniform[0, jitter]`.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter: Duration,
    /// Retry attempts that produced no response.
    pub retry_no_response: bool,
    /// Response statuses that may be retried. Empty for non-idempotent calls.
    pub retry_statuses: Vec<u16>,
}

impl RetryPolicy {
    /// Non-idempotent submission: only no-response outcomes are retried.
    /// Any response, 5xx included, is final.
    pub fn submission() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: Duration::from_millis(250),
            retry_no_response: true,
            retry_statuses: Vec::new(),
        }
    }

    /// Idempotent read: throttling and gateway errors are retried as well.
    pub fn query() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(15),
            jitter: Duration::from_millis(250),
            retry_no_response: true,
            retry_statuses: vec![429, 502, 503, 504],
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Same classification with zero delays. For tests and dry runs.
    pub fn without_delays(mut self) -> Self {
        self.base_delay = Duration::ZERO;
        self.max_delay = Duration::ZERO;
        self.jitter = Duration::ZERO;
        self
    }

    /// Deterministic part of the delay before retry `retry` (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = i32::try_from(retry).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exp);
        let cap = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= cap {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::submission()
    }
}

/// Pure retry decision after `attempts` attempts (1-based) ended in `outcome`.
pub fn next_action(attempts: u32, outcome: &AttemptOutcome, policy: &RetryPolicy) -> NextAction {
    let retries_left = attempts < policy.max_attempts;
    let retry = || NextAction::Retry {
        backoff: policy.backoff(attempts.saturating_sub(1)),
    };
    match outcome {
        AttemptOutcome::Response { status } => {
            if retries_left && policy.retry_statuses.contains(status) {
                retry()
            } else {
                NextAction::Deliver
            }
        }
        AttemptOutcome::NoResponse(_) => {
            if retries_left && policy.retry_no_response {
                retry()
            } else {
                NextAction::GiveUp
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn refused() -> AttemptOutcome {
        AttemptOutcome::NoResponse(SendFailure::ConnectionRefused("refused".into()))
    }

    #[test]
    fn submission_retries_no_response_until_exhausted() {
        let p = RetryPolicy::submission();
        assert_eq!(
            next_action(1, &refused(), &p),
            NextAction::Retry { backoff: Duration::from_secs(1) }
        );
        assert_eq!(
            next_action(2, &refused(), &p),
            NextAction::Retry { backoff: Duration::from_secs(2) }
        );
        assert_eq!(next_action(3, &refused(), &p), NextAction::GiveUp);
    }

    #[test]
    fn submission_never_retries_a_response() {
        let p = RetryPolicy::submission();
        for status in [200, 400, 429, 500, 502, 503] {
            assert_eq!(next_action(1, &AttemptOutcome::Response { status }, &p), NextAction::Deliver);
        }
    }

    #[test]
    fn query_retries_transient_statuses() {
        let p = RetryPolicy::query();
        assert!(matches!(
            next_action(1, &AttemptOutcome::Response { status: 503 }, &p),
            NextAction::Retry { .. }
        ));
        assert_eq!(
            next_action(1, &AttemptOutcome::Response { status: 500 }, &p),
            NextAction::Deliver
        );
        // Out of attempts: the last response is handed over, not dropped.
        assert_eq!(
            next_action(4, &AttemptOutcome::Response { status: 503 }, &p),
            NextAction::Deliver
        );
    }

    #[test]
    fn timeout_counts_as_no_response() {
        let p = RetryPolicy::submission();
        let outcome = AttemptOutcome::NoResponse(SendFailure::Timeout);
        assert!(matches!(next_action(1, &outcome, &p), NextAction::Retry { .. }));
    }

    #[test]
    fn backoff_is_capped() {
        let p = RetryPolicy::submission();
        assert_eq!(p.backoff(0), Duration::from_secs(1));
        assert_eq!(p.backoff(3), Duration::from_secs(8));
        assert_eq!(p.backoff(4), Duration::from_secs(10));
        assert_eq!(p.backoff(200), Duration::from_secs(10));
    }

    #[test]
    fn without_delays_keeps_classification() {
        let p = RetryPolicy::query().without_delays();
        assert_eq!(
            next_action(1, &AttemptOutcome::Response { status: 429 }, &p),
            NextAction::Retry { backoff: Duration::ZERO }
        );
    }

    proptest! {
        #[test]
        fn backoff_is_monotonic_and_bounded(a in 0u32..64, b in 0u32..64) {
            let p = RetryPolicy::query();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(p.backoff(lo) <= p.backoff(hi));
            prop_assert!(p.backoff(hi) <= p.max_delay);
        }

        #[test]
        fn never_exceeds_max_attempts(max in 1u32..10, attempts in 1u32..20) {
            let p = RetryPolicy::submission().with_max_attempts(max);
            let action = next_action(attempts, &refused(), &p);
            if attempts >= max {
                prop_assert_eq!(action, NextAction::GiveUp);
            } else {
                prop_assert!(matches!(action, NextAction::Retry { .. }), "expected retry");
            }
        }
    }
}

//! Retry budget, backoff and response classification.

use std::time::Duration;

use serde::Deserialize;

use super::OutboundRequest;

/// How requests with non-safe methods are treated by the retry loop.
///
/// Replaying a `POST` that reached the server but whose response was lost
/// would apply it twice, so by default only requests that carry an
/// `Idempotency-Key` are replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryMutating {
    /// One attempt only.
    Never,
    /// Full budget when an `Idempotency-Key` header is present, else one attempt.
    #[default]
    WithIdempotencyKey,
    /// Full budget regardless.
    Always,
}

/// Retry budget and backoff bounds for one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Values below 1 behave as 1.
    pub max_attempts: u32,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    pub retry_mutating: RetryMutating,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_min: Duration::from_millis(200),
            backoff_max: Duration::from_secs(5),
            retry_mutating: RetryMutating::default(),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.backoff_min = min;
        self.backoff_max = max;
        self
    }

    #[must_use]
    pub fn with_retry_mutating(mut self, retry_mutating: RetryMutating) -> Self {
        self.retry_mutating = retry_mutating;
        self
    }

    /// Attempts allowed for `request` after method gating.
    pub fn attempts_for(&self, request: &OutboundRequest) -> u32 {
        let budget = self.max_attempts.max(1);
        if request.method().is_safe() {
            return budget;
        }
        match self.retry_mutating {
            RetryMutating::Never => 1,
            RetryMutating::WithIdempotencyKey if request.has_idempotency_key() => budget,
            RetryMutating::WithIdempotencyKey => 1,
            RetryMutating::Always => budget,
        }
    }

    /// Delay before the attempt following `attempt` (1-based).
    ///
    /// `min * 2^(attempt-1)` capped at `max`; a server-supplied `Retry-After`
    /// replaces the computed value but is still capped.
    pub fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let delay = retry_after.unwrap_or_else(|| {
            let exp = attempt.saturating_sub(1).min(31);
            self.backoff_min.saturating_mul(1u32 << exp)
        });
        delay.min(self.backoff_max)
    }
}

/// What the retry loop does with a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Retryable,
    Terminal,
}

/// `< 300` succeeds; `429` and `5xx` other than `501` are retried; everything
/// else is a terminal error.
pub fn classify_status(status: u16) -> StatusClass {
    match status {
        0..=299 => StatusClass::Success,
        429 => StatusClass::Retryable,
        501 => StatusClass::Terminal,
        500..=599 => StatusClass::Retryable,
        _ => StatusClass::Terminal,
    }
}

/// Parses a `Retry-After` value given in seconds. HTTP-date values are ignored.
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;

    #[test]
    fn classifies_statuses() {
        assert_eq!(classify_status(200), StatusClass::Success);
        assert_eq!(classify_status(204), StatusClass::Success);
        assert_eq!(classify_status(302), StatusClass::Terminal);
        assert_eq!(classify_status(404), StatusClass::Terminal);
        assert_eq!(classify_status(429), StatusClass::Retryable);
        assert_eq!(classify_status(500), StatusClass::Retryable);
        assert_eq!(classify_status(501), StatusClass::Terminal);
        assert_eq!(classify_status(503), StatusClass::Retryable);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default()
            .with_backoff(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(policy.backoff(1, None), Duration::from_millis(100));
        assert_eq!(policy.backoff(2, None), Duration::from_millis(200));
        assert_eq!(policy.backoff(3, None), Duration::from_millis(350));
        assert_eq!(policy.backoff(60, None), Duration::from_millis(350));
    }

    #[test]
    fn retry_after_overrides_but_is_capped() {
        let policy = RetryPolicy::default()
            .with_backoff(Duration::from_millis(100), Duration::from_secs(2));
        assert_eq!(
            policy.backoff(1, parse_retry_after("1")),
            Duration::from_secs(1)
        );
        assert_eq!(
            policy.backoff(1, parse_retry_after(" 120 ")),
            Duration::from_secs(2)
        );
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn non_safe_methods_are_gated() {
        let policy = RetryPolicy::default().with_max_attempts(4);
        let get = OutboundRequest::new(Method::Get, "http://x/");
        let post = OutboundRequest::new(Method::Post, "http://x/");
        let keyed = OutboundRequest::new(Method::Post, "http://x/").idempotency_key("k-1");

        assert_eq!(policy.attempts_for(&get), 4);
        assert_eq!(policy.attempts_for(&post), 1);
        assert_eq!(policy.attempts_for(&keyed), 4);

        let never = policy.clone().with_retry_mutating(RetryMutating::Never);
        assert_eq!(never.attempts_for(&keyed), 1);
        assert_eq!(never.attempts_for(&get), 4);

        let always = policy.with_retry_mutating(RetryMutating::Always);
        assert_eq!(always.attempts_for(&post), 4);
    }

    #[test]
    fn zero_attempts_still_sends_once() {
        let policy = RetryPolicy::default().with_max_attempts(0);
        assert_eq!(
            policy.attempts_for(&OutboundRequest::new(Method::Get, "http://x/")),
            1
        );
    }

    #[test]
    fn retry_mutating_reads_snake_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: RetryMutating,
        }
        let w: Wrapper = serde_json::from_str(r#"{"mode":"with_idempotency_key"}"#).unwrap();
        assert_eq!(w.mode, RetryMutating::WithIdempotencyKey);
    }
}

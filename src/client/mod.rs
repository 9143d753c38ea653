//! Outbound calls to cooperating services.
//!
//! [`RetryingClient`] signs the caller onto each request, retries transient
//! failures within a [`RetryPolicy`], and turns the final outcome into either
//! the response body or a [`TrustError`].

mod request;
mod retry;
mod transport;

use std::sync::Arc;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::context::CallContext;
use crate::error::{ApiError, TrustError};
use crate::http::Method;
use crate::propagation::{self, REQUEST_ID_HEADER};
use crate::security::secret::SecretSource;

pub use request::{IDEMPOTENCY_KEY_HEADER, OutboundRequest};
pub use retry::{RetryMutating, RetryPolicy, StatusClass, classify_status};
pub use transport::{ReqwestTransport, Transport, TransportError, TransportResponse};

/// Signs, sends and retries outbound requests.
///
/// The client is cheap to share behind an `Arc`; it holds no per-request state.
pub struct RetryingClient<T = ReqwestTransport> {
    transport: T,
    policy: RetryPolicy,
    secret: Arc<dyn SecretSource>,
}

impl RetryingClient<ReqwestTransport> {
    /// A client over a fresh [`reqwest::Client`].
    pub fn new(policy: RetryPolicy, secret: Arc<dyn SecretSource>) -> Result<Self, TrustError> {
        let transport = ReqwestTransport::new().map_err(|source| TrustError::Transport {
            attempts: 0,
            source,
        })?;
        Ok(Self::with_transport(transport, policy, secret))
    }
}

impl<T: Transport> RetryingClient<T> {
    pub fn with_transport(transport: T, policy: RetryPolicy, secret: Arc<dyn SecretSource>) -> Self {
        Self {
            transport,
            policy,
            secret,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Builds a signed request for the caller of `call` and executes it.
    pub async fn send(
        &self,
        call: &CallContext,
        method: Method,
        url: impl Into<String>,
        body: impl Into<Bytes>,
    ) -> Result<Bytes, TrustError> {
        let request =
            propagation::build_signed_request(call, self.secret.as_ref(), method, url, body.into())?;
        self.execute(call, request).await
    }

    /// Executes `request`, retrying per the policy.
    ///
    /// Cancellation and the deadline of `call` are honoured before every
    /// attempt, while an attempt is in flight, and during backoff.
    pub async fn execute(
        &self,
        call: &CallContext,
        request: OutboundRequest,
    ) -> Result<Bytes, TrustError> {
        let max_attempts = self.policy.attempts_for(&request);
        let request_id = request.headers().get(REQUEST_ID_HEADER).unwrap_or("");
        let user = call.user_label();
        let mut attempt = 0u32;

        loop {
            if call.is_cancelled() {
                return Err(TrustError::Cancelled);
            }
            if call.is_expired() {
                return Err(TrustError::DeadlineExceeded);
            }
            attempt += 1;

            let outcome = tokio::select! {
                biased;
                _ = call.cancellation().cancelled() => return Err(TrustError::Cancelled),
                _ = deadline_elapsed(call.deadline()) => return Err(TrustError::DeadlineExceeded),
                outcome = self.transport.send(&request) => outcome,
            };

            let retry_after = match outcome {
                Ok(response) => match classify_status(response.status) {
                    StatusClass::Success => {
                        debug!(request_id, user, attempt, status = response.status, url = request.url(), "outbound call succeeded");
                        return Ok(response.body);
                    }
                    StatusClass::Terminal => {
                        warn!(request_id, user, attempt, status = response.status, url = request.url(), "outbound call failed");
                        return Err(decode_failure(response.status, &response.body));
                    }
                    StatusClass::Retryable if attempt >= max_attempts => {
                        error!(request_id, user, attempt, status = response.status, url = request.url(), "retry budget exhausted");
                        return Err(TrustError::RetriesExhausted {
                            attempts: attempt,
                            status: response.status,
                            body: String::from_utf8_lossy(&response.body).into_owned(),
                        });
                    }
                    StatusClass::Retryable => {
                        warn!(request_id, user, attempt, status = response.status, url = request.url(), "retryable status");
                        response
                            .headers
                            .get("Retry-After")
                            .and_then(retry::parse_retry_after)
                    }
                },
                Err(source) if !source.is_retryable() => {
                    error!(request_id, user, attempt, error = %source, "outbound request rejected before sending");
                    return Err(TrustError::InvalidRequest(source.to_string()));
                }
                Err(source) if attempt >= max_attempts => {
                    error!(request_id, user, attempt, error = %source, "retry budget exhausted");
                    return Err(TrustError::Transport {
                        attempts: attempt,
                        source,
                    });
                }
                Err(source) => {
                    warn!(request_id, user, attempt, error = %source, "transport error");
                    None
                }
            };

            let delay = self.policy.backoff(attempt, retry_after);
            tokio::select! {
                biased;
                _ = call.cancellation().cancelled() => return Err(TrustError::Cancelled),
                _ = deadline_elapsed(call.deadline()) => return Err(TrustError::DeadlineExceeded),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

fn decode_failure(status: u16, body: &[u8]) -> TrustError {
    match serde_json::from_slice::<ApiError>(body) {
        Ok(api) => TrustError::Application(api),
        Err(_) => TrustError::Upstream {
            status,
            body: String::from_utf8_lossy(body).into_owned(),
        },
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

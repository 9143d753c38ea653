//! Outbound request representation, independent of the HTTP client in use.

use bytes::Bytes;

use crate::http::{Headers, Method};

/// Header that marks a non-safe request as safe to replay.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// A request to another service.
///
/// Built by [`build_signed_request`](crate::propagation::build_signed_request)
/// or by hand, then executed by a [`RetryingClient`](super::RetryingClient).
/// The body is a [`Bytes`] so retries resend it without copying.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    method: Method,
    url: String,
    headers: Headers,
    body: Bytes,
}

impl OutboundRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Marks the request as replayable even though its method is not safe.
    #[must_use]
    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.headers.set(IDEMPOTENCY_KEY_HEADER, key);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn has_idempotency_key(&self) -> bool {
        self.headers
            .get(IDEMPOTENCY_KEY_HEADER)
            .is_some_and(|k| !k.is_empty())
    }
}

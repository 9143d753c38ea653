//! The execution context a request runs under: who is calling, which logical
//! request this is, and when to give up.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::identity::Identity;

/// Caller identity and request-scoped controls, carried through a service and
/// forwarded on every outbound call.
///
/// A `CallContext` is immutable once built; the `with_*` methods return a new
/// value. Children derived by [`parse_signed_request`] share the parent's
/// cancellation token and deadline.
///
/// [`parse_signed_request`]: crate::propagation::parse_signed_request
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use trustgate::{CallContext, identity::Identity};
///
/// let call = CallContext::authenticated(Identity::new(42, "a@b.c"))
///     .with_allowed_role("meter.read")
///     .with_timeout(Duration::from_secs(5));
/// assert_eq!(call.identity().map(|u| u.id), Some(42));
/// assert!(call.request_id().is_none());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    identity: Option<Arc<Identity>>,
    request_id: Option<String>,
    signature: Option<String>,
    allowed_role: Option<String>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context with no caller attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context for a caller authenticated at ingress.
    pub fn authenticated(identity: Identity) -> Self {
        Self {
            identity: Some(Arc::new(identity)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    #[must_use]
    pub fn with_allowed_role(mut self, role: impl Into<String>) -> Self {
        self.allowed_role = Some(role.into());
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// A child context for a verified inbound request. Cancellation and
    /// deadline are inherited from `self`.
    pub(crate) fn verified(
        &self,
        identity: Identity,
        request_id: String,
        signature: String,
        allowed_role: Option<String>,
    ) -> Self {
        Self {
            identity: Some(Arc::new(identity)),
            request_id: Some(request_id),
            signature: Some(signature),
            allowed_role,
            cancel: self.cancel.clone(),
            deadline: self.deadline,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_deref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// The signature the identity arrived with, when it was verified from
    /// inbound headers.
    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    pub fn allowed_role(&self) -> Option<&str> {
        self.allowed_role.as_deref()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// The caller's email for log fields, empty when anonymous.
    pub(crate) fn user_label(&self) -> &str {
        self.identity().map(|u| u.email.as_str()).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verified_child_inherits_controls() {
        let token = CancellationToken::new();
        let parent = CallContext::new()
            .with_cancellation(token.clone())
            .with_timeout(Duration::from_secs(30));
        let child = parent.verified(
            Identity::new(1, "x@y.z"),
            "rid".into(),
            "sig".into(),
            Some("admin".into()),
        );
        assert_eq!(child.deadline(), parent.deadline());
        assert_eq!(child.request_id(), Some("rid"));
        assert_eq!(child.signature(), Some("sig"));
        assert_eq!(child.allowed_role(), Some("admin"));

        token.cancel();
        assert!(child.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expires() {
        let call = CallContext::new().with_timeout(Duration::from_millis(10));
        assert!(!call.is_expired());
        tokio::time::advance(Duration::from_millis(11)).await;
        assert!(call.is_expired());
    }
}

//! Identity propagation between services.
//!
//! An outbound call carries four headers:
//!
//! | Header                 | Content                                     |
//! |------------------------|---------------------------------------------|
//! | `X-Identity-Signature` | base64 signature over the identity bytes    |
//! | `X-Identity`           | canonical JSON identity                     |
//! | `X-Request-Id`         | correlation id, unchanged across hops       |
//! | `X-Allowed-Role`       | role the callee may act as for the caller   |
//!
//! The receiving service verifies the signature over the exact identity bytes
//! it received before trusting any field, then forwards the verified identity
//! on its own outbound calls.
//!
//! These names, and the `TRUSTGATE_SIGNING_SECRET` default, are not
//! wire-compatible with services that use the older `User` / `Sign` /
//! `RequestID` / `AllowedUserRole` header set. A fleet mixing both rejects
//! every cross-set call as unsigned.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tracing::warn;

use crate::client::OutboundRequest;
use crate::context::CallContext;
use crate::error::TrustError;
use crate::http::{Headers, Method};
use crate::identity::Identity;
use crate::security::secret::SecretSource;
use crate::security::signature;

pub const SIGNATURE_HEADER: &str = "X-Identity-Signature";
pub const IDENTITY_HEADER: &str = "X-Identity";
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";
pub const ALLOWED_ROLE_HEADER: &str = "X-Allowed-Role";

/// Builds a correlation id for the first hop: `<unix-nanos>:<email>:<session>`.
pub fn form_request_id(identity: &Identity) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{nanos}:{}:{}", identity.email, identity.session_token)
}

/// Writes the four propagation headers for `call` into `headers`.
///
/// An anonymous call is signed over the default identity, so receivers never
/// need a separate unsigned path.
pub fn sign_headers(
    call: &CallContext,
    secret: &dyn SecretSource,
    headers: &mut Headers,
) -> Result<(), TrustError> {
    let anonymous = Identity::default();
    let identity = call.identity().unwrap_or(&anonymous);
    let payload = identity.to_canonical_bytes();
    let signature = signature::sign(&secret.secret()?, &payload);
    let request_id = match call.request_id() {
        Some(id) => id.to_owned(),
        None => form_request_id(identity),
    };

    headers.set(SIGNATURE_HEADER, signature);
    // The canonical form is serde_json output and therefore valid UTF-8.
    headers.set(IDENTITY_HEADER, String::from_utf8_lossy(&payload).into_owned());
    headers.set(REQUEST_ID_HEADER, request_id);
    headers.set(ALLOWED_ROLE_HEADER, call.allowed_role().unwrap_or(""));
    Ok(())
}

/// Builds an outbound request that carries the caller of `call`.
///
/// # Examples
///
/// ```
/// use trustgate::{CallContext, Method, identity::Identity};
/// use trustgate::propagation::{build_signed_request, SIGNATURE_HEADER};
/// use trustgate::security::secret::StaticSecret;
///
/// let call = CallContext::authenticated(Identity::new(42, "a@b.c")).with_request_id("r-1");
/// let req = build_signed_request(
///     &call,
///     &StaticSecret::new("s3cret"),
///     Method::Get,
///     "http://meters.internal/v1/meters",
///     bytes::Bytes::new(),
/// )
/// .unwrap();
/// assert!(req.headers().contains(SIGNATURE_HEADER));
/// assert_eq!(req.headers().get("x-request-id"), Some("r-1"));
/// ```
pub fn build_signed_request(
    call: &CallContext,
    secret: &dyn SecretSource,
    method: Method,
    url: impl Into<String>,
    body: Bytes,
) -> Result<OutboundRequest, TrustError> {
    let mut request = OutboundRequest::new(method, url).with_body(body);
    sign_headers(call, secret, request.headers_mut())?;
    Ok(request)
}

/// Reconstructs the caller from propagation headers.
///
/// On success returns a child of `parent` carrying the verified identity, the
/// correlation id (generated when absent), the signature and the allowed role.
/// On failure `parent` is left untouched and the request must be rejected.
pub fn parse_signed_request(
    headers: &Headers,
    parent: &CallContext,
    secret: &dyn SecretSource,
) -> Result<CallContext, TrustError> {
    let payload = headers.get(IDENTITY_HEADER).unwrap_or("");
    let supplied = headers.get(SIGNATURE_HEADER).unwrap_or("");
    let request_id = headers.get(REQUEST_ID_HEADER).filter(|id| !id.is_empty());

    let secret = secret.secret()?;
    if !signature::verify(supplied, payload.as_bytes(), &secret) {
        warn!(request_id = request_id.unwrap_or(""), "identity signature rejected");
        return Err(TrustError::Authentication(
            "signature for user is incorrect".to_owned(),
        ));
    }

    let identity = Identity::from_canonical_bytes(payload.as_bytes()).map_err(|e| {
        warn!(request_id = request_id.unwrap_or(""), error = %e, "signed identity is not parseable");
        TrustError::Authentication(format!("cannot parse identity header: {e}"))
    })?;

    let request_id = match request_id {
        Some(id) => id.to_owned(),
        None => form_request_id(&identity),
    };
    let allowed_role = headers
        .get(ALLOWED_ROLE_HEADER)
        .filter(|role| !role.is_empty())
        .map(str::to_owned);

    Ok(parent.verified(identity, request_id, supplied.to_owned(), allowed_role))
}

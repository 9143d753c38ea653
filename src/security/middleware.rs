//! Identity verification middleware.

use std::sync::Arc;

use crate::{
    Response, StatusCode,
    context::{CallContext, Context},
    middleware::{BoxResponse, Middleware, Next},
    propagation,
};

use super::secret::SecretSource;

/// Verifies the signed caller identity on every inbound request.
///
/// On success the verified [`CallContext`] replaces the root context in the
/// request extensions, where later layers and the endpoint read it through
/// [`Context::call`]. On failure the request is answered with
/// `403 Forbidden` and a structured error body; nothing downstream runs.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use trustgate::{Response, StatusCode};
/// use trustgate::middleware::Pipeline;
/// use trustgate::security::{IdentityMiddleware, secret::EnvSecret};
///
/// let pipeline = Pipeline::new(|ctx| async move {
///     let user = ctx.call().and_then(|c| c.identity()).map(|u| u.email.clone());
///     Response::new(StatusCode::Ok).body(user.unwrap_or_default())
/// })
/// .layer(IdentityMiddleware::new(Arc::new(EnvSecret::default())));
/// ```
pub struct IdentityMiddleware {
    secret: Arc<dyn SecretSource>,
}

impl IdentityMiddleware {
    pub fn new(secret: Arc<dyn SecretSource>) -> Self {
        Self { secret }
    }
}

impl Middleware for IdentityMiddleware {
    fn handle(&self, mut ctx: Context, next: Next) -> BoxResponse {
        let secret = self.secret.clone();
        Box::pin(async move {
            let parent = ctx.call().cloned().unwrap_or_default();
            let verified =
                propagation::parse_signed_request(ctx.request().headers(), &parent, secret.as_ref());
            match verified {
                Ok(call) => {
                    ctx.extensions_mut().insert::<CallContext>(call);
                    next.run(ctx).await
                }
                Err(e) => Response::new(StatusCode::Forbidden).json(&e.to_api_error()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Method, Request,
        error::{ApiError, NOT_AUTH_ERROR},
        http::Headers,
        identity::Identity,
        middleware::Pipeline,
        propagation::{IDENTITY_HEADER, sign_headers},
        security::secret::StaticSecret,
    };

    fn pipeline() -> Pipeline {
        Pipeline::new(|ctx: Context| async move {
            let call = ctx.call().cloned().unwrap_or_default();
            let body = format!(
                "{}|{}|{}",
                call.identity().map(|u| u.id).unwrap_or_default(),
                call.request_id().unwrap_or(""),
                call.allowed_role().unwrap_or("")
            );
            Response::new(StatusCode::Ok).body(body)
        })
        .layer(IdentityMiddleware::new(Arc::new(StaticSecret::new("s3cret"))))
    }

    fn signed_request(call: &CallContext) -> Request {
        let mut headers = Headers::new();
        sign_headers(call, &StaticSecret::new("s3cret"), &mut headers).unwrap();
        let mut request = Request::new(Method::Get, "/v1/meters");
        *request.headers_mut() = headers;
        request
    }

    #[tokio::test]
    async fn verified_caller_reaches_endpoint() {
        let call = CallContext::authenticated(Identity::new(42, "a@b.c"))
            .with_request_id("rid-9")
            .with_allowed_role("reader");
        let response = pipeline().handle(signed_request(&call)).await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.body_slice(), b"42|rid-9|reader");
    }

    #[tokio::test]
    async fn forged_identity_is_refused_with_structured_body() {
        let call = CallContext::authenticated(Identity::new(42, "a@b.c"));
        let mut request = signed_request(&call);
        let forged = request
            .headers()
            .get(IDENTITY_HEADER)
            .unwrap()
            .replace("a@b.c", "root@b.c");
        request.headers_mut().set(IDENTITY_HEADER, forged);

        let response = pipeline().handle(request).await;
        assert_eq!(response.status(), StatusCode::Forbidden);
        let body: ApiError = serde_json::from_slice(response.body_slice()).unwrap();
        assert_eq!(body.code, NOT_AUTH_ERROR);
        assert!(body.description.contains("signature"));
    }

    #[tokio::test]
    async fn unsigned_request_is_refused() {
        let response = pipeline().handle(Request::new(Method::Get, "/")).await;
        assert_eq!(response.status(), StatusCode::Forbidden);
        assert_eq!(response.headers().get("content-type"), Some("application/json"));
    }

    #[tokio::test]
    async fn verified_context_inherits_root_cancellation() {
        let token = tokio_util::sync::CancellationToken::new();
        let pipeline = Pipeline::new(|ctx: Context| async move {
            let cancelled = ctx.call().is_some_and(|c| c.is_cancelled());
            Response::new(StatusCode::Ok).body(cancelled.to_string())
        })
        .layer(IdentityMiddleware::new(Arc::new(StaticSecret::new("s3cret"))));

        token.cancel();
        let request = signed_request(&CallContext::authenticated(Identity::new(1, "x@y.z")));
        let response = pipeline
            .handle_with(request, CallContext::new().with_cancellation(token))
            .await;
        assert_eq!(response.body_slice(), b"true");
    }
}

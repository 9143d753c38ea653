//! Middleware pipeline for inbound requests.
//!
//! A [`Pipeline`] is an ordered stack of [`Middleware`] layers in front of an
//! endpoint. Each layer may inspect the [`Context`], answer on its own, or
//! forward to the rest of the chain through [`Next`]. A typical service stacks
//!
//! ```text
//! LoggerMiddleware -> IdentityMiddleware -> CacheMiddleware -> endpoint
//! ```
//!
//! so that identity is verified before the cache keys anything on it.
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by every layer.
//! - [`Next`]: cursor into the remaining chain; call [`Next::run`] to advance.
//! - [`MiddlewareHandler`]: type-erased, cheaply cloneable layer.
//! - [`from_middleware`]: turns a [`Middleware`] into a [`MiddlewareHandler`].
//! - [`Pipeline`]: the assembled stack plus endpoint.
//! - [`LoggerMiddleware`]: request/response logger.

use std::{future::Future, pin::Pin, sync::Arc};
use tokio::time::Instant;

use crate::{
    Request, Response, StatusCode,
    context::{CallContext, Context},
    propagation::REQUEST_ID_HEADER,
};

/// Boxed future returned by middleware and endpoints.
pub type BoxResponse = Pin<Box<dyn Future<Output = Response> + Send>>;

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed by [`run`](Self::run), so a layer can forward at most once.
///
/// # Examples
///
/// ```rust,no_run
/// use trustgate::{context::Context, middleware::{BoxResponse, Middleware, Next}};
///
/// struct PassThrough;
///
/// impl Middleware for PassThrough {
///     fn handle(&self, ctx: Context, next: Next) -> BoxResponse {
///         Box::pin(async move { next.run(ctx).await })
///     }
/// }
/// ```
pub struct Next {
    middlewares: Arc<[MiddlewareHandler]>,
    // Position of the handler the next `run` call invokes.
    index: usize,
}

/// A type-erased, reference-counted middleware function.
pub type MiddlewareHandler = Arc<dyn Fn(Context, Next) -> BoxResponse + Send + Sync + 'static>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

impl Next {
    /// Creates a cursor positioned at the start of `middlewares`.
    pub fn new(middlewares: impl Into<Arc<[MiddlewareHandler]>>) -> Self {
        Self {
            middlewares: middlewares.into(),
            index: 0,
        }
    }

    /// Invokes the next handler in the chain.
    ///
    /// An exhausted chain answers `500 Internal Server Error`; a correctly
    /// built [`Pipeline`] always ends in its endpoint, so this only happens
    /// when a chain is assembled by hand.
    pub async fn run(mut self, ctx: Context) -> Response {
        if self.index < self.middlewares.len() {
            let handler = self.middlewares[self.index].clone();
            self.index += 1;
            handler(ctx, self).await
        } else {
            Response::new(StatusCode::InternalServerError)
                .body("No response generated by middleware pipeline")
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors receive a [`Context`] and a [`Next`] cursor. They may pass
/// through, short-circuit by answering directly, or decorate the response
/// produced downstream.
///
/// Implementations are shared across Tokio tasks, so they must be
/// `Send + Sync` and must not hold locks across `.await` points.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> BoxResponse;
}

/// An ordered middleware stack ending in an endpoint.
///
/// Layers run in the order they are added; the first added sees the request
/// first and the response last.
///
/// # Examples
///
/// ```
/// use trustgate::{Method, Request, Response, StatusCode};
/// use trustgate::middleware::{LoggerMiddleware, Pipeline};
///
/// # tokio_test_block_on(async {
/// let pipeline = Pipeline::new(|_ctx| async { Response::new(StatusCode::Ok).body("pong") })
///     .layer(LoggerMiddleware);
/// let response = pipeline.handle(Request::new(Method::Get, "/ping")).await;
/// assert_eq!(response.body_slice(), b"pong");
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Clone)]
pub struct Pipeline {
    layers: Vec<MiddlewareHandler>,
    endpoint: MiddlewareHandler,
    chain: Arc<[MiddlewareHandler]>,
}

impl Pipeline {
    /// A pipeline with no layers in front of `endpoint`.
    pub fn new<H, Fut>(endpoint: H) -> Self
    where
        H: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        let endpoint: MiddlewareHandler =
            Arc::new(move |ctx: Context, _next: Next| -> BoxResponse { Box::pin(endpoint(ctx)) });
        Self {
            layers: Vec::new(),
            chain: Arc::from(vec![endpoint.clone()]),
            endpoint,
        }
    }

    /// Appends `middleware` after the layers already added.
    #[must_use]
    pub fn layer<M>(self, middleware: M) -> Self
    where
        M: Middleware + 'static,
    {
        self.layer_handler(from_middleware(Arc::new(middleware)))
    }

    /// Appends a layer that is already type-erased.
    #[must_use]
    pub fn layer_handler(mut self, handler: MiddlewareHandler) -> Self {
        self.layers.push(handler);
        self.chain = self
            .layers
            .iter()
            .cloned()
            .chain(std::iter::once(self.endpoint.clone()))
            .collect();
        self
    }

    /// Number of layers, not counting the endpoint.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Runs `request` through the stack with a fresh root [`CallContext`].
    pub async fn handle(&self, request: Request) -> Response {
        self.handle_with(request, CallContext::new()).await
    }

    /// Runs `request` under `root`, whose cancellation token and deadline are
    /// inherited by the verified call context.
    pub async fn handle_with(&self, request: Request, root: CallContext) -> Response {
        let mut ctx = Context::new(request);
        ctx.extensions_mut().insert(root);
        Next::new(self.chain.clone()).run(ctx).await
    }
}

/// Logs each request's method, path, status, duration and correlation id.
///
/// Emits a single `tracing::info!` record after the downstream handler
/// completes. The correlation id is read from the inbound `X-Request-Id`
/// header, so the logger can sit outside the identity layer.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> BoxResponse {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().as_str().to_string();
            let path = ctx.request().path().to_string();
            let header_request_id = ctx
                .request()
                .headers()
                .get(REQUEST_ID_HEADER)
                .unwrap_or("")
                .to_string();

            let response = next.run(ctx).await;

            let duration = start.elapsed();
            let status = response.status().as_u16();

            tracing::info!(
                request_id = %header_request_id,
                status,
                "{} {} - {} ({:?})",
                method,
                path,
                status,
                duration
            );

            response
        })
    }
}

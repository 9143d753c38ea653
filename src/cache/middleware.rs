//! Per-caller response caching for inbound requests.

use std::sync::Arc;

use tokio::time::Instant;

use super::remote::{CacheError, ResponseCache, Snapshot};
use crate::{
    Method, Response,
    context::Context,
    logging::{LogSink, TracingSink},
    middleware::{BoxResponse, Middleware, Next},
};

/// Diagnostic header added to responses served from the cache.
pub const CACHE_HEADER: &str = "X-Cache";

/// Serves repeated `GET`s from the [`ResponseCache`] and drops a caller's
/// entries after any successful write by that caller.
///
/// Must run after [`IdentityMiddleware`](crate::security::IdentityMiddleware):
/// requests without a verified, non-anonymous caller pass straight through,
/// as does everything when the cache is disabled.
///
/// | Method                       | Behaviour                                                   |
/// |------------------------------|-------------------------------------------------------------|
/// | `GET`                        | replay on hit; on miss run the handler, store if status < 400 |
/// | `POST` `PUT` `PATCH` `DELETE`| run the handler; if status < 400 delete the caller's entries |
/// | anything else                | pass through                                                |
///
/// Cache failures are reported to the [`LogSink`] and treated as misses.
pub struct CacheMiddleware {
    cache: Arc<ResponseCache>,
    sink: Arc<dyn LogSink>,
}

impl CacheMiddleware {
    pub fn new(cache: Arc<ResponseCache>) -> Self {
        Self {
            cache,
            sink: Arc::new(TracingSink),
        }
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }
}

impl Middleware for CacheMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> BoxResponse {
        let cache = self.cache.clone();
        let sink = self.sink.clone();
        Box::pin(async move {
            let owner = ctx
                .call()
                .and_then(|c| c.identity())
                .filter(|u| !u.is_anonymous())
                .map(|u| u.id);
            let Some(owner) = owner else {
                sink.write("cache bypass: no caller identity");
                return next.run(ctx).await;
            };
            if !cache.is_enabled() {
                sink.write("cache bypass: cache disabled");
                return next.run(ctx).await;
            }

            let method = ctx.request().method().clone();
            let target = ctx.request().target();
            match method {
                Method::Get => cached_read(&cache, sink.as_ref(), owner, &target, ctx, next).await,
                m if m.is_mutating() => {
                    let response = next.run(ctx).await;
                    if response.status().is_error() {
                        sink.write(&format!(
                            "cache kept for user {owner}: {m} {target} returned {}",
                            response.status().as_u16()
                        ));
                        return response;
                    }
                    match cache.delete(&cache.owner_pattern(owner)).await {
                        Ok(n) => sink.write(&format!(
                            "cache invalidated for user {owner} after {m} {target}: {n} entries"
                        )),
                        Err(e) => sink.write(&format!(
                            "cache invalidation failed for user {owner}: {e}"
                        )),
                    }
                    response
                }
                m => {
                    sink.write(&format!("cache bypass: method {m}"));
                    next.run(ctx).await
                }
            }
        })
    }
}

async fn cached_read(
    cache: &ResponseCache,
    sink: &dyn LogSink,
    owner: u32,
    target: &str,
    ctx: Context,
    next: Next,
) -> Response {
    let key = cache.key(owner, target);
    let started = Instant::now();
    match cache.get(&key).await {
        Ok(snapshot) => match snapshot.to_response() {
            Some(mut response) => {
                let elapsed = started.elapsed().as_millis();
                response.add_header(CACHE_HEADER, format!("{elapsed} ms"));
                sink.write(&format!("cache hit for user {owner}: {target}"));
                return response;
            }
            None => sink.write(&format!(
                "cache entry for user {owner} has unusable status {}",
                snapshot.status
            )),
        },
        Err(CacheError::NotFound) => sink.write(&format!("cache miss for user {owner}: {target}")),
        Err(e) => sink.write(&format!("cache read failed for user {owner}: {e}")),
    }

    let response = next.run(ctx).await;
    if response.status().is_error() {
        sink.write(&format!(
            "not caching {target}: status {}",
            response.status().as_u16()
        ));
        return response;
    }
    match cache.set(&key, &Snapshot::from_response(&response)).await {
        Ok(()) => sink.write(&format!("cached response for user {owner}: {target}")),
        Err(e) => sink.write(&format!("cache write failed for user {owner}: {e}")),
    }
    response
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::{
        Request, StatusCode,
        cache::store::MemoryStore,
        context::CallContext,
        identity::Identity,
        logging::MemorySink,
        middleware::Pipeline,
    };

    struct Harness {
        pipeline: Pipeline,
        store: Arc<MemoryStore>,
        sink: MemorySink,
        calls: Arc<AtomicU32>,
    }

    /// Endpoint answers with a counter so replays are distinguishable from
    /// fresh renders. `/fail` answers 404.
    fn harness(cache: Option<Arc<MemoryStore>>) -> Harness {
        let store = cache.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let response_cache = Arc::new(ResponseCache::with_store(
            store.clone(),
            Duration::from_secs(60),
            "",
        ));
        let sink = MemorySink::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let pipeline = Pipeline::new(move |ctx: Context| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if ctx.request().path() == "/fail" {
                    return Response::new(StatusCode::NotFound).body("nope");
                }
                Response::new(StatusCode::Ok)
                    .header("Set-Cookie", "a=1")
                    .header("Set-Cookie", "b=2")
                    .body(format!("render {n}"))
            }
        })
        .layer(CacheMiddleware::new(response_cache).with_sink(Arc::new(sink.clone())));
        Harness {
            pipeline,
            store,
            sink,
            calls,
        }
    }

    fn as_user(id: u32) -> CallContext {
        CallContext::authenticated(Identity::new(id, format!("u{id}@x.y")))
    }

    async fn send(h: &Harness, method: Method, target: &str, user: Option<u32>) -> Response {
        let root = user.map(as_user).unwrap_or_default();
        h.pipeline
            .handle_with(Request::new(method, target), root)
            .await
    }

    #[tokio::test]
    async fn get_hit_replays_without_calling_handler() {
        let h = harness(None);
        let first = send(&h, Method::Get, "/v1/meters?page=1", Some(7)).await;
        let second = send(&h, Method::Get, "/v1/meters?page=1", Some(7)).await;

        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.status(), first.status());
        assert_eq!(second.body_slice(), first.body_slice());
        assert_eq!(second.headers().get_all("set-cookie").collect::<Vec<_>>(), ["a=1", "b=2"]);
        assert!(first.headers().get(CACHE_HEADER).is_none());
        assert!(second.headers().get(CACHE_HEADER).unwrap().ends_with(" ms"));
        assert!(h.sink.contains("cache hit for user 7"));
    }

    #[tokio::test]
    async fn entries_are_per_user_and_per_target() {
        let h = harness(None);
        send(&h, Method::Get, "/v1/meters", Some(7)).await;
        send(&h, Method::Get, "/v1/meters", Some(8)).await;
        send(&h, Method::Get, "/v1/meters?page=2", Some(7)).await;
        assert_eq!(h.calls.load(Ordering::SeqCst), 3);
        assert_eq!(h.store.keys().len(), 3);
    }

    #[tokio::test]
    async fn successful_write_invalidates_only_that_user() {
        let h = harness(None);
        send(&h, Method::Get, "/v1/meters", Some(7)).await;
        send(&h, Method::Get, "/v1/meters", Some(8)).await;

        let put = send(&h, Method::Put, "/v1/meters/1", Some(7)).await;
        assert_eq!(put.status(), StatusCode::Ok);
        assert_eq!(h.store.keys().len(), 1);
        assert!(h.store.keys()[0].starts_with("8:"));

        let after = send(&h, Method::Get, "/v1/meters", Some(7)).await;
        assert!(after.headers().get(CACHE_HEADER).is_none());
        assert!(h.sink.contains("cache invalidated for user 7"));
    }

    #[tokio::test]
    async fn failed_write_keeps_entries() {
        let h = harness(None);
        send(&h, Method::Get, "/v1/meters", Some(7)).await;
        let failed = send(&h, Method::Delete, "/fail", Some(7)).await;
        assert_eq!(failed.status(), StatusCode::NotFound);
        assert_eq!(h.store.keys().len(), 1);
    }

    #[tokio::test]
    async fn error_responses_are_not_cached() {
        let h = harness(None);
        send(&h, Method::Get, "/fail", Some(7)).await;
        send(&h, Method::Get, "/fail", Some(7)).await;
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
        assert!(h.store.keys().is_empty());
        assert!(h.sink.contains("not caching /fail"));
    }

    #[tokio::test]
    async fn anonymous_and_unverified_requests_bypass() {
        let h = harness(None);
        send(&h, Method::Get, "/v1/meters", None).await;
        h.pipeline
            .handle_with(
                Request::new(Method::Get, "/v1/meters"),
                CallContext::authenticated(Identity::default()),
            )
            .await;
        assert!(h.store.keys().is_empty());
        assert!(h.sink.contains("no caller identity"));
    }

    #[tokio::test]
    async fn other_methods_bypass() {
        let h = harness(None);
        send(&h, Method::Get, "/v1/meters", Some(7)).await;
        send(&h, Method::Options, "/v1/meters", Some(7)).await;
        send(&h, Method::Head, "/v1/meters", Some(7)).await;
        assert_eq!(h.store.keys().len(), 1);
        assert!(h.sink.contains("cache bypass: method OPTIONS"));
    }

    #[tokio::test]
    async fn unavailable_store_degrades_to_pass_through() {
        let store = Arc::new(MemoryStore::new());
        let h = harness(Some(store.clone()));
        store.set_offline(true);
        let response = send(&h, Method::Get, "/v1/meters", Some(7)).await;
        assert_eq!(response.status(), StatusCode::Ok);
        send(&h, Method::Get, "/v1/meters", Some(7)).await;
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
        assert!(h.sink.contains("cache read failed"));
        assert!(h.sink.contains("cache write failed"));
    }

    #[tokio::test]
    async fn disabled_cache_bypasses() {
        let sink = MemorySink::new();
        let pipeline = Pipeline::new(|_ctx| async { Response::new(StatusCode::Ok) }).layer(
            CacheMiddleware::new(Arc::new(ResponseCache::disabled()))
                .with_sink(Arc::new(sink.clone())),
        );
        pipeline
            .handle_with(Request::new(Method::Get, "/"), as_user(7))
            .await;
        assert!(sink.contains("cache disabled"));
    }
}

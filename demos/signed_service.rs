//! Two services on one runtime: a `gateway` that forwards to `meters`.
//!
//! The demo acts as the edge: it authenticates a user, calls the gateway with
//! a signed identity, and the gateway forwards that same caller to the meters
//! service. Meters caches per caller, so the second read is a hit.
//!
//! ```text
//! RUST_LOG=trustgate=debug,signed_service=info cargo run --example signed_service
//! ```
//!
//! The secret is read from `TRUSTGATE_SIGNING_SECRET`; a fixed demo secret is
//! used when it is unset.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use trustgate::cache::{CacheMiddleware, MemoryStore, ResponseCache};
use trustgate::config::TrustConfig;
use trustgate::identity::Identity;
use trustgate::middleware::{LoggerMiddleware, Pipeline};
use trustgate::security::{IdentityMiddleware, SecretSource, StaticSecret};
use trustgate::{CallContext, Method, Response, RetryingClient, Server, StatusCode};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = TrustConfig::from_toml_str(
        r#"
        [retry]
        max_attempts = 3
        backoff_min_ms = 50
        backoff_max_ms = 500
        "#,
    )?;

    let env_secret = config.signing.secret_source();
    let secret: Arc<dyn SecretSource> = if env_secret.secret().is_ok() {
        Arc::new(env_secret)
    } else {
        warn!(var = env_secret.var(), "signing secret unset, using demo secret");
        Arc::new(StaticSecret::new("demo-secret"))
    };
    let shutdown = CancellationToken::new();

    // meters: verifies the caller and caches reads per caller.
    let cache = Arc::new(ResponseCache::with_store(
        Arc::new(MemoryStore::new()),
        config.remote_cache.ttl(),
        "meters:",
    ));
    let meters = Pipeline::new(|ctx| async move {
        let user = ctx.call().and_then(|c| c.identity()).map(|u| u.id).unwrap_or_default();
        Response::new(StatusCode::Ok).json(&serde_json::json!({
            "owner": user,
            "meters": [{ "id": 1, "name": "hall" }, { "id": 2, "name": "kitchen" }],
        }))
    })
    .layer(LoggerMiddleware)
    .layer(IdentityMiddleware::new(secret.clone()))
    .layer(CacheMiddleware::new(cache.clone()));

    let meters_server = Server::bind("127.0.0.1:0").await?;
    let meters_url = format!("http://{}/v1/meters", meters_server.local_addr());
    tokio::spawn(meters_server.serve_until(meters, shutdown.clone()));

    // gateway: verifies the caller, then forwards it to meters.
    let client = Arc::new(RetryingClient::new(config.retry.policy(), secret.clone())?);
    let forward = client.clone();
    let gateway = Pipeline::new(move |ctx| {
        let client = forward.clone();
        let url = meters_url.clone();
        async move {
            let call = ctx.call().cloned().unwrap_or_default();
            match client.send(&call, Method::Get, url, Bytes::new()).await {
                Ok(body) => Response::new(StatusCode::Ok)
                    .header("Content-Type", "application/json")
                    .body_bytes(body.to_vec()),
                Err(e) => Response::new(StatusCode::BadGateway).json(&e.to_api_error()),
            }
        }
    })
    .layer(LoggerMiddleware)
    .layer(IdentityMiddleware::new(secret.clone()));

    let gateway_server = Server::bind("127.0.0.1:0").await?;
    let gateway_url = format!("http://{}/dashboard", gateway_server.local_addr());
    tokio::spawn(gateway_server.serve_until(gateway, shutdown.clone()));

    // The edge: a user logged in, every hop now carries them.
    let caller = CallContext::authenticated(
        Identity::new(42, "ada@example.com")
            .with_session("session-42")
            .with_role("meter.read"),
    )
    .with_allowed_role("meter.read")
    .with_timeout(Duration::from_secs(5));

    for round in 1..=2 {
        let body = client
            .send(&caller, Method::Get, gateway_url.clone(), Bytes::new())
            .await?;
        info!(round, body = %String::from_utf8_lossy(&body), "dashboard");
    }

    shutdown.cancel();
    cache.close().await?;
    Ok(())
}

//! # trustgate
//!
//! Trust plumbing for a fleet of cooperating HTTP services: every outbound
//! call carries the original caller's identity, signed with a shared secret,
//! and every inbound request verifies that signature before anything else
//! runs. On top of that sit a retrying service client, a per-caller response
//! cache, and a small in-process TTL cache.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use trustgate::{Response, StatusCode, server::Server};
//! use trustgate::cache::{CacheMiddleware, ResponseCache};
//! use trustgate::config::TrustConfig;
//! use trustgate::middleware::{LoggerMiddleware, Pipeline};
//! use trustgate::security::IdentityMiddleware;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TrustConfig::load("trustgate.toml")?;
//!     let cache = Arc::new(ResponseCache::connect_or_disabled(&config.remote_cache).await);
//!
//!     let pipeline = Pipeline::new(|ctx| async move {
//!         let email = ctx.call().and_then(|c| c.identity()).map(|u| u.email.clone());
//!         Response::new(StatusCode::Ok).body(email.unwrap_or_default())
//!     })
//!     .layer(LoggerMiddleware)
//!     .layer(IdentityMiddleware::new(Arc::new(config.signing.secret_source())))
//!     .layer(CacheMiddleware::new(cache));
//!
//!     Server::bind("127.0.0.1:8080").await?.serve(pipeline).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod identity;
pub mod logging;
pub mod middleware;
pub mod propagation;
pub mod security;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use client::{RetryPolicy, RetryingClient};
pub use context::CallContext;
pub use error::{ApiError, ErrorKind, TrustError};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use identity::Identity;
pub use server::{Server, ServerError};

//! Identity signatures, the shared secret, and the middleware that enforces them.

pub mod middleware;
pub mod secret;
pub mod signature;

pub use middleware::IdentityMiddleware;
pub use secret::{EnvSecret, SecretSource, StaticSecret};

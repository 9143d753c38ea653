//! Where the shared signing secret comes from.

use std::fmt;

use crate::error::TrustError;

/// Default environment variable holding the shared signing secret.
pub const SECRET_ENV_VAR: &str = "TRUSTGATE_SIGNING_SECRET";

/// Supplies the shared secret used to sign and verify identities.
///
/// Implementations are consulted on every sign/verify so that a rotated
/// secret takes effect on the next call.
pub trait SecretSource: Send + Sync {
    /// Returns the current secret. An unset or empty secret is an error:
    /// nothing is ever signed or verified with an empty key.
    fn secret(&self) -> Result<Vec<u8>, TrustError>;
}

/// Reads the secret from an environment variable at call time.
#[derive(Debug, Clone)]
pub struct EnvSecret {
    var: String,
}

impl EnvSecret {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    pub fn var(&self) -> &str {
        &self.var
    }
}

impl Default for EnvSecret {
    fn default() -> Self {
        Self::new(SECRET_ENV_VAR)
    }
}

impl SecretSource for EnvSecret {
    fn secret(&self) -> Result<Vec<u8>, TrustError> {
        match std::env::var(&self.var) {
            Ok(value) if !value.is_empty() => Ok(value.into_bytes()),
            _ => Err(TrustError::MissingSecret {
                var: self.var.clone(),
            }),
        }
    }
}

/// A fixed secret, for tests and for services that load it from their own
/// configuration.
#[derive(Clone)]
pub struct StaticSecret(Vec<u8>);

impl StaticSecret {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self(secret.into())
    }
}

impl fmt::Debug for StaticSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticSecret(<redacted>)")
    }
}

impl SecretSource for StaticSecret {
    fn secret(&self) -> Result<Vec<u8>, TrustError> {
        if self.0.is_empty() {
            return Err(TrustError::MissingSecret {
                var: "<static>".to_owned(),
            });
        }
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_secret_is_read_on_every_call() {
        let var = "TRUSTGATE_TEST_SECRET_ROTATION";
        let source = EnvSecret::new(var);

        // SAFETY: the variable name is unique to this test.
        unsafe { std::env::set_var(var, "first") };
        assert_eq!(source.secret().unwrap(), b"first");

        unsafe { std::env::set_var(var, "second") };
        assert_eq!(source.secret().unwrap(), b"second");

        unsafe { std::env::remove_var(var) };
        assert!(matches!(
            source.secret(),
            Err(TrustError::MissingSecret { var: v }) if v == var
        ));
    }

    #[test]
    fn empty_values_are_rejected() {
        assert!(StaticSecret::new("").secret().is_err());
        assert_eq!(StaticSecret::new("k").secret().unwrap(), b"k");
    }

    #[test]
    fn static_secret_debug_is_redacted() {
        assert!(!format!("{:?}", StaticSecret::new("hunter2")).contains("hunter2"));
    }
}

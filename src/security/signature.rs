//! Identity signatures: `base64(SHA-256(identity_bytes || secret))`.
//!
//! Both functions are pure. The receiver must verify over the exact bytes it
//! received in the identity header, never over a re-serialized identity.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const DIGEST_LEN: usize = 32;

fn digest(secret: &[u8], identity: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(identity);
    hasher.update(secret);
    hasher.finalize().into()
}

/// Signs `identity` with the shared `secret`.
///
/// # Examples
///
/// ```
/// use trustgate::security::signature::{sign, verify};
///
/// let identity = br#"{"id":42,"email":"a@b.c","sessionKey":"","roles":[]}"#;
/// let sig = sign(b"s3cret", identity);
/// assert!(verify(&sig, identity, b"s3cret"));
/// assert!(!verify(&sig, identity, b"other"));
/// ```
pub fn sign(secret: &[u8], identity: &[u8]) -> String {
    STANDARD.encode(digest(secret, identity))
}

/// Checks `signature` against `identity` and `secret`.
///
/// Fails closed: an empty signature, one that is not valid base64, or one that
/// does not decode to a SHA-256 digest is rejected. The digest comparison is
/// constant-time.
pub fn verify(signature: &str, identity: &[u8], secret: &[u8]) -> bool {
    if signature.is_empty() {
        return false;
    }
    let Ok(supplied) = STANDARD.decode(signature) else {
        return false;
    };
    if supplied.len() != DIGEST_LEN {
        return false;
    }
    let expected = digest(secret, identity);
    expected.as_slice().ct_eq(supplied.as_slice()).into()
}

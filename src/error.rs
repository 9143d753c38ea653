//! Error taxonomy shared across the trust layer.
//!
//! Each failure belongs to one [`ErrorKind`], which decides whether it is
//! retried, surfaced verbatim, or swallowed into a cache miss.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::client::TransportError;

/// Code sent when a caller's identity could not be verified.
pub const NOT_AUTH_ERROR: u32 = 6;

/// Code sent for failures that are not the caller's fault.
pub const INTERNAL_ERROR: u32 = 13;

/// The structured error body exchanged between services:
/// `{"Code": <u32>, "Description": <string>}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{description} (code {code})")]
pub struct ApiError {
    #[serde(rename = "Code")]
    pub code: u32,
    #[serde(rename = "Description")]
    pub description: String,
}

impl ApiError {
    pub fn new(code: u32, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }
}

/// Coarse classification used for retry and propagation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Signature invalid or identity unparsable. Never retried.
    Authentication,
    /// Network failure or retry budget spent on transient statuses.
    Transport,
    /// A terminal error reported by the upstream service.
    Application,
    /// The caller gave up (cancellation or deadline). Never retried.
    Cancelled,
    /// The remote response cache could not be used; degrade to a miss.
    CacheUnavailable,
    /// An operation on an undeclared local cache table.
    Programmer,
}

/// Errors produced by identity propagation and outbound calls.
#[derive(Debug, Error)]
pub enum TrustError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("signing secret is not configured (environment variable {var})")]
    MissingSecret { var: String },

    #[error("transport failure after {attempts} attempt(s): {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("giving up after {attempts} attempt(s), last status {status}")]
    RetriesExhausted {
        attempts: u32,
        status: u16,
        body: String,
    },

    #[error("upstream error: {0}")]
    Application(ApiError),

    #[error("upstream returned status {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("request cancelled")]
    Cancelled,

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    #[error("invalid outbound request: {0}")]
    InvalidRequest(String),
}

impl TrustError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Authentication(_) | Self::MissingSecret { .. } => ErrorKind::Authentication,
            Self::Transport { .. } | Self::RetriesExhausted { .. } => ErrorKind::Transport,
            Self::Application(_) | Self::Upstream { .. } | Self::InvalidRequest(_) => {
                ErrorKind::Application
            }
            Self::Cancelled | Self::DeadlineExceeded => ErrorKind::Cancelled,
        }
    }

    /// Converts the error into the wire body sent back to a caller.
    ///
    /// Upstream application errors keep their own code so they reach the
    /// original caller unchanged.
    pub fn to_api_error(&self) -> ApiError {
        match self {
            Self::Application(api) => api.clone(),
            Self::Authentication(_) | Self::MissingSecret { .. } => {
                ApiError::new(NOT_AUTH_ERROR, self.to_string())
            }
            _ => ApiError::new(INTERNAL_ERROR, self.to_string()),
        }
    }
}

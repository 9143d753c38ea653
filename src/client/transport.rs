//! The seam between the retry logic and the wire.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderName, HeaderValue};
use thiserror::Error;

use super::OutboundRequest;
use crate::http::Headers;

/// A response as seen by the retry classifier.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

/// Failure to obtain any response at all.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("invalid header {name:?} on outbound request")]
    InvalidHeader { name: String },

    #[error("invalid method {0:?} on outbound request")]
    InvalidMethod(String),

    #[error("{0}")]
    Io(String),
}

impl TransportError {
    /// `false` when the request itself is malformed and resending it cannot help.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => !e.is_builder(),
            Self::InvalidHeader { .. } | Self::InvalidMethod(_) => false,
            Self::Io(_) => true,
        }
    }
}

/// Sends one attempt of an outbound request.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &OutboundRequest) -> Result<TransportResponse, TransportError>;
}

/// [`Transport`] backed by a shared [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("trustgate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Wraps an existing client, e.g. one configured with TLS roots or a
    /// connect timeout.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<TransportResponse, TransportError> {
        let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes())
            .map_err(|_| TransportError::InvalidMethod(request.method().to_string()))?;

        let mut builder = self.client.request(method, request.url());
        for (name, value) in request.headers().iter() {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                TransportError::InvalidHeader {
                    name: name.to_owned(),
                }
            })?;
            // from_bytes accepts UTF-8 identity payloads that from_str would reject.
            let header_value = HeaderValue::from_bytes(value.as_bytes()).map_err(|_| {
                TransportError::InvalidHeader {
                    name: name.to_owned(),
                }
            })?;
            builder = builder.header(header_name, header_value);
        }
        if !request.body().is_empty() {
            builder = builder.body(request.body().clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let mut headers = Headers::with_capacity(response.headers().len());
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str(), value);
            }
        }
        let body = response.bytes().await?;

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

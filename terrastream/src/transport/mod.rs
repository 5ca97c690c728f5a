//! Network transport abstraction.
//!
//! The request scheduler never talks to the network directly. It hands a
//! [`TransportRequest`] to a [`Transport`] and awaits the returned future.
//! Dropping that future aborts the transfer.
//!
//! # Example
//!
//! ```ignore
//! use terrastream::transport::{ReqwestTransport, Transport, TransportRequest};
//!
//! let transport = ReqwestTransport::new()?;
//! let bytes = transport
//!     .send(TransportRequest::get("https://tiles.example.com/3/4/2.png"))
//!     .await?;
//! ```

mod data_url;
mod http;

pub use data_url::{decode_data_url, is_local_url};
pub use http::ReqwestTransport;

#[cfg(test)]
pub use http::tests::{MockResponse, MockTransport};

use std::fmt;

use bytes::Bytes;
pub use futures::future::BoxFuture;
pub use reqwest::Method;

/// How the caller intends to interpret the response body.
///
/// Transports return raw bytes regardless; the hint is forwarded so that an
/// implementation can set an appropriate `Accept` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    #[default]
    ArrayBuffer,
    Json,
    Text,
    Image,
}

impl ResponseType {
    /// `Accept` header value for this response type.
    pub fn accept_header(&self) -> &'static str {
        match self {
            ResponseType::ArrayBuffer => "*/*",
            ResponseType::Json => "application/json,*/*;q=0.01",
            ResponseType::Text => "text/plain,*/*;q=0.01",
            ResponseType::Image => "image/*,*/*;q=0.01",
        }
    }
}

/// A single network call.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: String,
    pub method: Method,
    pub response_type: ResponseType,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl TransportRequest {
    /// A GET request for raw bytes.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            response_type: ResponseType::ArrayBuffer,
            headers: Vec::new(),
            body: None,
        }
    }
}

/// Failure reported by a transport.
///
/// Carries whatever the server sent back so that retry callbacks can inspect
/// the status code and headers.
#[derive(Debug, Clone, Default)]
pub struct TransportError {
    /// HTTP status code, if a response was received.
    pub status: Option<u16>,
    /// Human-readable description.
    pub message: String,
    /// Response body, if any.
    pub body: Option<Bytes>,
    /// Response headers, if any.
    pub headers: Vec<(String, String)>,
}

impl TransportError {
    /// An error that occurred before any response was received.
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// An error response with the given status code.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
            ..Default::default()
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {}: {}", status, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for TransportError {}

/// Performs network calls on behalf of the scheduler.
///
/// Implementations must be `Send + Sync`; the returned future is spawned onto
/// the tokio runtime and may be dropped at any time to abort the call.
pub trait Transport: Send + Sync {
    fn send(&self, request: TransportRequest) -> BoxFuture<'static, Result<Bytes, TransportError>>;
}

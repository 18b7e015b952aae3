//! Transport seam between the harness and the wire-level HTTP client.
//!
//! The engine never talks to a socket itself. It hands an
//! [`ResponseConsumer`] to an [`HttpTransport`] implementation, which drives
//! the consumer with a headers event, zero or more chunk events, and exactly
//! one terminal completion-or-error callback. The consumer can stop the
//! subscription at any point by returning [`Directive::Stop`], and the
//! transport must also honour the cancellation token by aborting the
//! exchange and reporting a cancellation-kind error.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Version};
use tokio_util::sync::CancellationToken;

#[cfg(feature = "reqwest")]
pub(crate) mod reqwest;

/// Status line and headers of a response, delivered before any body bytes.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    /// Response status code.
    pub status: StatusCode,
    /// Negotiated HTTP version.
    pub version: Version,
    /// Response headers.
    pub headers: HeaderMap,
}

impl ResponseHead {
    /// Look up a header value as UTF-8 text.
    ///
    /// Returns `None` when the header is absent or not valid UTF-8.
    #[must_use]
    pub fn header_str(&self, name: &http::header::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Instruction returned by consumer callbacks to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Keep delivering events.
    Continue,
    /// Abort the subscription; no further events are wanted.
    Stop,
}

/// Streaming receiver for one HTTP exchange.
///
/// Callbacks may arrive on any worker thread. Implementations must be
/// internally synchronised; the transport guarantees only that chunk
/// callbacks for a single exchange are not delivered concurrently.
pub trait ResponseConsumer: Send + Sync {
    /// Status line and headers arrived.
    fn on_headers(&self, head: &ResponseHead) -> Directive;
    /// One body chunk arrived. The slice is a read-only view; implementations
    /// must copy what they want to keep.
    fn on_chunk(&self, chunk: &[u8]) -> Directive;
    /// The body stream finished cleanly.
    fn on_complete(&self);
    /// The exchange failed. Terminal; transports may report the same failure
    /// from more than one code path and consumers must tolerate duplicates.
    fn on_error(&self, cause: TransportError);
}

/// Failure surfaced by a transport, categorised for the assertion engine.
///
/// Cloneable on purpose: the same cause is recorded on the result handle and
/// passed to thrown-category assertions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The server never answered within the start (time-to-first-byte)
    /// deadline. The pipeline treats this as a timeout, not a failure.
    #[error("no response within the start deadline")]
    StartTimeout,
    /// The exchange was aborted through its cancellation token.
    #[error("exchange was cancelled")]
    Cancelled,
    /// Connection establishment failed.
    #[error("connection failed: {0}")]
    Connect(String),
    /// The connection dropped or the body stream failed mid-transfer.
    #[error("transfer failed: {0}")]
    Io(String),
    /// The request could not be sent as constructed.
    #[error("request rejected: {0}")]
    BadRequest(String),
}

impl TransportError {
    /// Whether this cause means the server never started answering.
    #[must_use]
    pub fn is_start_timeout(&self) -> bool { matches!(self, Self::StartTimeout) }

    /// Whether this cause is consistent with a forced abort of the exchange.
    ///
    /// Used by the pipeline to resolve quietly when the error callback is
    /// merely the echo of its own cancellation.
    #[must_use]
    pub fn is_abort_artifact(&self) -> bool { matches!(self, Self::Cancelled | Self::Io(_)) }
}

/// Fully assembled request handed to the transport.
#[derive(Debug, Clone)]
pub struct WireRequest {
    /// Request method.
    pub method: Method,
    /// Absolute request URL.
    pub url: String,
    /// Preferred HTTP version, if any.
    pub version: Option<Version>,
    /// Request headers, defaults already merged.
    pub headers: HeaderMap,
    /// Request body bytes, if any.
    pub body: Option<Bytes>,
    /// Bound on time-to-first-byte. The overall finish deadline is enforced
    /// by the watchdog, not the transport.
    pub start_timeout: Option<Duration>,
}

/// Asynchronous request/response capability consumed by the harness.
///
/// `execute` drives `consumer` through the event sequence described on
/// [`ResponseConsumer`] and returns once the exchange has fully settled.
/// Failures are delivered through `on_error`, never as a return value, so
/// the caller can fire-and-forget the returned future.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Run one exchange to completion, cancellation, or failure.
    async fn execute(
        &self,
        request: WireRequest,
        consumer: Arc<dyn ResponseConsumer>,
        cancel: CancellationToken,
    );
}

#[cfg(feature = "reqwest")]
pub use self::reqwest::ReqwestTransport;

//! Default transport backed by `reqwest`.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use super::{Directive, HttpTransport, ResponseConsumer, ResponseHead, TransportError, WireRequest};

/// [`HttpTransport`] implementation over a shared [`reqwest::Client`].
///
/// The client owns connection pooling and TLS; this adapter only maps the
/// crate's consumer contract onto `reqwest`'s streaming API. The start
/// timeout bounds time-to-first-byte; once headers have arrived the exchange
/// runs until the stream ends, the consumer stops it, or the cancellation
/// token fires.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Wrap an existing client.
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self { Self { client } }

    /// Build a transport over a fresh client with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] when the TLS backend cannot be
    /// initialised.
    pub fn with_defaults() -> Result<Self, TransportError> {
        reqwest::Client::builder()
            .build()
            .map(Self::new)
            .map_err(|e| TransportError::Connect(e.to_string()))
    }

    async fn drive(
        &self,
        request: WireRequest,
        consumer: &dyn ResponseConsumer,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(version) = request.version {
            builder = builder.version(version);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let send = builder.send();
        let response = match request.start_timeout {
            Some(limit) => tokio::select! {
                () = cancel.cancelled() => return Err(TransportError::Cancelled),
                outcome = tokio::time::timeout(limit, send) => match outcome {
                    Err(_) => return Err(TransportError::StartTimeout),
                    Ok(sent) => sent.map_err(classify)?,
                },
            },
            None => tokio::select! {
                () = cancel.cancelled() => return Err(TransportError::Cancelled),
                sent = send => sent.map_err(classify)?,
            },
        };

        let head = ResponseHead {
            status: response.status(),
            version: response.version(),
            headers: response.headers().clone(),
        };
        if consumer.on_headers(&head) == Directive::Stop {
            return Ok(());
        }

        let mut stream = response.bytes_stream();
        loop {
            tokio::select! {
                () = cancel.cancelled() => return Err(TransportError::Cancelled),
                item = stream.next() => match item {
                    Some(Ok(chunk)) => {
                        if consumer.on_chunk(&chunk) == Directive::Stop {
                            return Ok(());
                        }
                    }
                    Some(Err(e)) => return Err(classify(e)),
                    None => break,
                },
            }
        }
        consumer.on_complete();
        Ok(())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(
        &self,
        request: WireRequest,
        consumer: Arc<dyn ResponseConsumer>,
        cancel: CancellationToken,
    ) {
        if let Err(cause) = self.drive(request, consumer.as_ref(), &cancel).await {
            consumer.on_error(cause);
        }
    }
}

fn classify(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::StartTimeout
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else if e.is_builder() || e.is_request() {
        TransportError::BadRequest(e.to_string())
    } else {
        TransportError::Io(e.to_string())
    }
}

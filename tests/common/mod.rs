//! Shared test support: a scripted transport double and tracing setup.
#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use http::{
    HeaderMap, StatusCode, Version,
    header::{HeaderName, HeaderValue},
};
use tokio_util::sync::CancellationToken;
use wireprobe::{
    Directive, HttpTransport, ResponseConsumer, ResponseHead, TransportError, WireRequest,
};

/// One event in a scripted exchange.
#[derive(Clone, Debug)]
pub enum Step {
    /// Deliver status and headers.
    Head {
        status: u16,
        headers: Vec<(&'static str, &'static str)>,
    },
    /// Deliver one body chunk.
    Chunk(Vec<u8>),
    /// Sleep, honouring cancellation.
    Wait(Duration),
    /// Finish the stream cleanly.
    Complete,
    /// Fail the exchange.
    Fail(TransportError),
    /// Never finish; settle only when cancelled.
    Hang,
}

pub fn head_ok() -> Step {
    Step::Head {
        status: 200,
        headers: Vec::new(),
    }
}

pub fn chunk(text: &str) -> Step { Step::Chunk(text.as_bytes().to_vec()) }

/// Transport double that replays the same script for every execute call.
pub struct MockTransport {
    script: Vec<Step>,
}

impl MockTransport {
    pub fn scripted(script: Vec<Step>) -> Arc<Self> { Arc::new(Self { script }) }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute(
        &self,
        _request: WireRequest,
        consumer: Arc<dyn ResponseConsumer>,
        cancel: CancellationToken,
    ) {
        for step in self.script.clone() {
            if cancel.is_cancelled() {
                consumer.on_error(TransportError::Cancelled);
                return;
            }
            match step {
                Step::Head { status, headers } => {
                    let mut map = HeaderMap::new();
                    for (name, value) in headers {
                        map.insert(
                            HeaderName::from_static(name),
                            HeaderValue::from_static(value),
                        );
                    }
                    let head = ResponseHead {
                        status: StatusCode::from_u16(status).expect("scripted status"),
                        version: Version::HTTP_11,
                        headers: map,
                    };
                    if consumer.on_headers(&head) == Directive::Stop {
                        return;
                    }
                }
                Step::Chunk(bytes) => {
                    if consumer.on_chunk(&bytes) == Directive::Stop {
                        return;
                    }
                }
                Step::Wait(delay) => {
                    tokio::select! {
                        () = cancel.cancelled() => {
                            consumer.on_error(TransportError::Cancelled);
                            return;
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Step::Complete => {
                    consumer.on_complete();
                    return;
                }
                Step::Fail(cause) => {
                    consumer.on_error(cause);
                    return;
                }
                Step::Hang => {
                    cancel.cancelled().await;
                    consumer.on_error(TransportError::Cancelled);
                    return;
                }
            }
        }
        consumer.on_complete();
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

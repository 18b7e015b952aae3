#![doc(html_root_url = "https://docs.rs/wireprobe/latest")]
//! Public API for the `wireprobe` library.
//!
//! This crate provides an asynchronous test-execution engine for HTTP
//! endpoints: a harness that launches requests, streams responses, and
//! evaluates configured assertions against headers, body content, streamed
//! chunks, HTTP version, timing behaviour, and surfaced transport failures.
//! Each launched probe is a cancellable task; a watchdog enforces overall
//! deadlines, an optional throttle bounds concurrency, and results
//! aggregate into a run-wide report.

pub mod assertion;
pub use assertion::{
    AssertionCategory,
    AssertionResult,
    AssertionSpec,
    AssertionStatus,
    Assertions,
    Severity,
};
pub mod codec;
pub use codec::{BodyCodec, CodecError, JsonCodec};
pub mod diff;
pub use diff::{Differ, StructuralDiffer};
pub mod error;
pub use error::{FailedAssertions, HarnessError};
pub mod harness;
pub use harness::{ProbeHarness, ProbeHarnessBuilder};
mod pipeline;
pub mod readiness;
pub use readiness::ReadinessGate;
pub mod report;
pub use report::{ReportCollector, RunSummary, TestRecord};
pub mod request;
pub use request::ProbeRequest;
pub mod results;
pub use results::TestResults;
pub mod task;
pub use task::{Task, TaskId, TaskRegistry, TaskState};
pub mod throttle;
pub use throttle::Throttle;
pub mod transport;
pub use transport::{
    Directive,
    HttpTransport,
    ResponseConsumer,
    ResponseHead,
    TransportError,
    WireRequest,
};
mod watchdog;

#[cfg(feature = "reqwest")]
pub use transport::ReqwestTransport;

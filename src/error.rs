//! Error types for harness orchestration.

use std::{fmt, time::Duration};

use crate::{assertion::AssertionResult, codec::CodecError};

/// Top-level error type for launching and awaiting probes.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum HarnessError {
    /// The readiness gate was not signalled within the allowed wait.
    #[error("readiness gate not signalled within {0:?}")]
    NotReady(Duration),
    /// The request could not be assembled into a wire request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The harness was built without a usable transport.
    #[error("harness configuration error: {0}")]
    Configuration(String),
    /// An awaited probe did not complete within the caller's deadline.
    #[error("timed out waiting for probe completion")]
    AwaitTimeout,
    /// Encoding the request body failed.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// One or more registered assertions did not come back ok.
    #[error(transparent)]
    Failed(#[from] FailedAssertions),
}

/// Aggregate raised by the blocking conveniences when assertions are not ok.
///
/// The `Display` output enumerates every offending result with its severity,
/// description, and observed value so a single failing run is diagnosable
/// without re-running.
#[derive(Debug, Clone)]
pub struct FailedAssertions {
    test: String,
    offending: Vec<AssertionResult>,
}

impl FailedAssertions {
    pub(crate) fn new(test: impl Into<String>, offending: Vec<AssertionResult>) -> Self {
        Self {
            test: test.into(),
            offending,
        }
    }

    /// Name of the probe whose assertions were not ok.
    #[must_use]
    pub fn test(&self) -> &str { &self.test }

    /// Every result that matched the caller's predicate.
    #[must_use]
    pub fn offending(&self) -> &[AssertionResult] { &self.offending }
}

impl fmt::Display for FailedAssertions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} assertion(s) not ok for `{}`:",
            self.offending.len(),
            self.test
        )?;
        for result in &self.offending {
            writeln!(f, "  - {result}")?;
        }
        Ok(())
    }
}

impl std::error::Error for FailedAssertions {}

//! Assertion model: configured checks and their recorded outcomes.
//!
//! An [`AssertionSpec`] pairs a description and severity with a check over
//! one response facet. Checks are a closed set of variants, one per
//! evaluation phase, each carrying its own facet-conversion and predicate
//! closure; evaluating a spec is a single `match`. A predicate that fails
//! to convert its facet (bad UTF-8, undecodable body) reports
//! [`AssertionStatus::InternalError`] rather than aborting the pipeline.
//!
//! Registration happens through [`Assertions`], handed to the caller's
//! configurer closure at launch. Severity defaults to [`Severity::Fatal`];
//! [`Assertions::warning`] scopes a block of registrations to
//! [`Severity::Warning`] and restores the previous severity afterwards.

use std::{fmt, sync::Arc};

use http::{StatusCode, Version, header::HeaderName};
use serde::Serialize;

use crate::{
    codec::{BodyCodec, JsonCodec},
    diff::{Differ, StructuralDiffer},
    transport::{ResponseHead, TransportError},
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// How a non-success outcome is treated by the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Recorded and reported, never fails the run.
    Warning,
    /// Fails the run when the outcome is not a success.
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Warning => "warning",
            Severity::Fatal => "fatal",
        })
    }
}

/// Outcome status of one evaluated (or swept) assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssertionStatus {
    /// The predicate held.
    Success,
    /// The predicate returned false.
    Failure,
    /// The predicate or its facet conversion failed.
    InternalError,
    /// The spec was registered but never evaluated (timeout, cancellation,
    /// or early abort).
    DidNotRun,
}

impl AssertionStatus {
    /// Whether this status counts as ok.
    #[must_use]
    pub fn is_success(self) -> bool { matches!(self, AssertionStatus::Success) }
}

impl fmt::Display for AssertionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AssertionStatus::Success => "success",
            AssertionStatus::Failure => "failure",
            AssertionStatus::InternalError => "internal error",
            AssertionStatus::DidNotRun => "did not run",
        })
    }
}

/// Which response facet a spec checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssertionCategory {
    /// A named response header.
    Header,
    /// The response status code.
    ResponseCode,
    /// The fully accumulated body.
    Body,
    /// Each streamed body chunk.
    Chunk,
    /// The negotiated HTTP version.
    Version,
    /// Whether the overall deadline elapsed.
    Timeout,
    /// The transport failure, when one is surfaced.
    Thrown,
}

impl fmt::Display for AssertionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AssertionCategory::Header => "header",
            AssertionCategory::ResponseCode => "response code",
            AssertionCategory::Body => "body",
            AssertionCategory::Chunk => "chunk",
            AssertionCategory::Version => "version",
            AssertionCategory::Timeout => "timeout",
            AssertionCategory::Thrown => "thrown",
        })
    }
}

/// Lifecycle point at which a spec is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Head,
    Chunk,
    Body,
    Timeout,
    Thrown,
}

/// Outcome of one predicate invocation: verdict plus the rendered observed
/// value for diagnostics.
pub(crate) struct Observed {
    pub(crate) passed: bool,
    pub(crate) value: String,
}

impl Observed {
    fn from_bool(passed: bool, value: impl fmt::Display) -> Self {
        Self {
            passed,
            value: value.to_string(),
        }
    }
}

type HeadCheck = Box<dyn Fn(&ResponseHead) -> Result<Observed, BoxError> + Send + Sync>;
type BytesCheck = Box<dyn Fn(&[u8]) -> Result<Observed, BoxError> + Send + Sync>;
type FlagCheck = Box<dyn Fn(bool) -> Result<Observed, BoxError> + Send + Sync>;
type CauseCheck = Box<dyn Fn(&TransportError) -> Result<Observed, BoxError> + Send + Sync>;

enum Check {
    Head(HeadCheck),
    Chunk(BytesCheck),
    Body(BytesCheck),
    Timeout(FlagCheck),
    Thrown(CauseCheck),
}

/// Response facet handed to [`AssertionSpec::evaluate`].
pub(crate) enum Facet<'a> {
    Head(&'a ResponseHead),
    Chunk(&'a [u8]),
    Body(&'a [u8]),
    TimedOut(bool),
    Thrown(&'a TransportError),
}

/// One configured check: description, severity, category, and predicate.
///
/// Owned exclusively by the pipeline that registered it; never shared
/// across requests.
pub struct AssertionSpec {
    description: String,
    severity: Severity,
    category: AssertionCategory,
    check: Check,
}

impl AssertionSpec {
    /// Human-readable description supplied at registration.
    #[must_use]
    pub fn description(&self) -> &str { &self.description }

    /// Severity supplied at registration.
    #[must_use]
    pub fn severity(&self) -> Severity { self.severity }

    /// Facet category of this spec.
    #[must_use]
    pub fn category(&self) -> AssertionCategory { self.category }

    pub(crate) fn phase(&self) -> Phase {
        match self.check {
            Check::Head(_) => Phase::Head,
            Check::Chunk(_) => Phase::Chunk,
            Check::Body(_) => Phase::Body,
            Check::Timeout(_) => Phase::Timeout,
            Check::Thrown(_) => Phase::Thrown,
        }
    }

    pub(crate) fn evaluate(&self, facet: &Facet<'_>) -> AssertionResult {
        let outcome = match (&self.check, facet) {
            (Check::Head(check), Facet::Head(head)) => check(head),
            (Check::Chunk(check), Facet::Chunk(chunk)) => check(chunk),
            (Check::Body(check), Facet::Body(body)) => check(body),
            (Check::Timeout(check), Facet::TimedOut(elapsed)) => check(*elapsed),
            (Check::Thrown(check), Facet::Thrown(cause)) => check(cause),
            _ => Err("assertion dispatched against the wrong response facet".into()),
        };
        match outcome {
            Ok(Observed { passed: true, value }) => self.result(AssertionStatus::Success, Some(value)),
            Ok(Observed { passed: false, value }) => {
                self.result(AssertionStatus::Failure, Some(value))
            }
            Err(cause) => self.result(AssertionStatus::InternalError, Some(cause.to_string())),
        }
    }

    pub(crate) fn did_not_run(&self) -> AssertionResult {
        self.result(AssertionStatus::DidNotRun, None)
    }

    fn result(&self, status: AssertionStatus, observed: Option<String>) -> AssertionResult {
        AssertionResult {
            description: self.description.clone(),
            severity: self.severity,
            category: self.category,
            status,
            observed,
        }
    }
}

impl fmt::Debug for AssertionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssertionSpec")
            .field("description", &self.description)
            .field("severity", &self.severity)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

/// Recorded outcome of evaluating (or sweeping) one spec.
///
/// Exactly one result is produced per registered spec per request, including
/// [`AssertionStatus::DidNotRun`] on timeout or cancellation.
#[derive(Debug, Clone)]
pub struct AssertionResult {
    description: String,
    severity: Severity,
    category: AssertionCategory,
    status: AssertionStatus,
    observed: Option<String>,
}

impl AssertionResult {
    /// Description of the originating spec.
    #[must_use]
    pub fn description(&self) -> &str { &self.description }

    /// Severity of the originating spec.
    #[must_use]
    pub fn severity(&self) -> Severity { self.severity }

    /// Category of the originating spec.
    #[must_use]
    pub fn category(&self) -> AssertionCategory { self.category }

    /// Outcome status.
    #[must_use]
    pub fn status(&self) -> AssertionStatus { self.status }

    /// Rendered observed value, or the captured cause for internal errors.
    #[must_use]
    pub fn observed(&self) -> Option<&str> { self.observed.as_deref() }

    /// Whether the outcome is a success.
    #[must_use]
    pub fn is_success(&self) -> bool { self.status.is_success() }
}

impl fmt::Display for AssertionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.status, self.severity, self.description)?;
        if let Some(observed) = &self.observed {
            write!(f, " (observed: {observed})")?;
        }
        Ok(())
    }
}

/// Registration surface handed to the configurer closure at launch.
///
/// All registrations default to [`Severity::Fatal`]; wrap a block in
/// [`Assertions::warning`] to record its outcomes without failing the run.
///
/// # Examples
///
/// ```
/// use http::StatusCode;
/// use wireprobe::Assertions;
///
/// let mut asserts = Assertions::new();
/// asserts
///     .status_equals(StatusCode::OK)
///     .body_equals("Hello world!")
///     .warning(|a| {
///         a.body_utf8("body mentions a greeting", |text| text.contains("Hello"));
///     });
/// ```
pub struct Assertions {
    severity: Severity,
    specs: Vec<AssertionSpec>,
    codec: Arc<dyn BodyCodec>,
    differ: Option<Arc<dyn Differ>>,
}

impl Assertions {
    /// Registration surface with the default collaborators (JSON codec,
    /// structural differ).
    #[must_use]
    pub fn new() -> Self {
        Self::with_collaborators(Arc::new(JsonCodec), Some(Arc::new(StructuralDiffer)))
    }

    pub(crate) fn with_collaborators(
        codec: Arc<dyn BodyCodec>,
        differ: Option<Arc<dyn Differ>>,
    ) -> Self {
        Self {
            severity: Severity::Fatal,
            specs: Vec::new(),
            codec,
            differ,
        }
    }

    /// Number of registered specs.
    #[must_use]
    pub fn len(&self) -> usize { self.specs.len() }

    /// Whether nothing has been registered yet.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.specs.is_empty() }

    pub(crate) fn into_specs(self) -> Vec<AssertionSpec> { self.specs }

    /// Run `configure` with the given severity as the registration default,
    /// restoring the previous severity afterwards.
    pub fn with_severity(
        &mut self,
        severity: Severity,
        configure: impl FnOnce(&mut Self),
    ) -> &mut Self {
        let previous = std::mem::replace(&mut self.severity, severity);
        configure(self);
        self.severity = previous;
        self
    }

    /// Register a block of assertions under [`Severity::Warning`].
    pub fn warning(&mut self, configure: impl FnOnce(&mut Self)) -> &mut Self {
        self.with_severity(Severity::Warning, configure)
    }

    fn register(
        &mut self,
        category: AssertionCategory,
        description: impl Into<String>,
        check: Check,
    ) -> &mut Self {
        self.specs.push(AssertionSpec {
            description: description.into(),
            severity: self.severity,
            category,
            check,
        });
        self
    }

    /// Check the response status code against an arbitrary predicate.
    pub fn status(
        &mut self,
        description: impl Into<String>,
        predicate: impl Fn(StatusCode) -> bool + Send + Sync + 'static,
    ) -> &mut Self {
        self.register(
            AssertionCategory::ResponseCode,
            description,
            Check::Head(Box::new(move |head| {
                Ok(Observed::from_bool(predicate(head.status), head.status))
            })),
        )
    }

    /// Check that the response status code equals `expected`.
    pub fn status_equals(&mut self, expected: StatusCode) -> &mut Self {
        self.status(format!("status code is {expected}"), move |status| {
            status == expected
        })
    }

    /// Check a named header's UTF-8 value (absent headers yield `None`).
    pub fn header(
        &mut self,
        description: impl Into<String>,
        name: HeaderName,
        predicate: impl Fn(Option<&str>) -> bool + Send + Sync + 'static,
    ) -> &mut Self {
        self.register(
            AssertionCategory::Header,
            description,
            Check::Head(Box::new(move |head| {
                let value = head.header_str(&name);
                Ok(Observed::from_bool(
                    predicate(value),
                    value.unwrap_or("<missing>"),
                ))
            })),
        )
    }

    /// Check that a named header is present and equals `expected`.
    pub fn header_equals(&mut self, name: HeaderName, expected: impl Into<String>) -> &mut Self {
        let expected = expected.into();
        let description = format!("header `{name}` equals \"{expected}\"");
        self.header(description, name, move |value| value == Some(&*expected))
    }

    /// Check the negotiated HTTP version.
    pub fn version(
        &mut self,
        description: impl Into<String>,
        predicate: impl Fn(Version) -> bool + Send + Sync + 'static,
    ) -> &mut Self {
        self.register(
            AssertionCategory::Version,
            description,
            Check::Head(Box::new(move |head| {
                Ok(Observed::from_bool(
                    predicate(head.version),
                    format!("{:?}", head.version),
                ))
            })),
        )
    }

    /// Check that the negotiated HTTP version equals `expected`.
    pub fn version_equals(&mut self, expected: Version) -> &mut Self {
        self.version(format!("negotiated version is {expected:?}"), move |got| {
            got == expected
        })
    }

    /// Check every streamed chunk as it arrives.
    ///
    /// The predicate runs once per chunk against a read-only view; the
    /// spec's single result is the first non-success outcome, or a success
    /// once the stream ends with every chunk passing.
    pub fn chunk(
        &mut self,
        description: impl Into<String>,
        predicate: impl Fn(&[u8]) -> bool + Send + Sync + 'static,
    ) -> &mut Self {
        self.register(
            AssertionCategory::Chunk,
            description,
            Check::Chunk(Box::new(move |chunk| {
                Ok(Observed::from_bool(predicate(chunk), preview(chunk)))
            })),
        )
    }

    /// Check the fully accumulated body bytes.
    pub fn body(
        &mut self,
        description: impl Into<String>,
        predicate: impl Fn(&[u8]) -> bool + Send + Sync + 'static,
    ) -> &mut Self {
        self.register(
            AssertionCategory::Body,
            description,
            Check::Body(Box::new(move |body| {
                Ok(Observed::from_bool(predicate(body), preview(body)))
            })),
        )
    }

    /// Check the accumulated body as UTF-8 text.
    ///
    /// A body that is not valid UTF-8 records an internal error instead of
    /// invoking the predicate.
    pub fn body_utf8(
        &mut self,
        description: impl Into<String>,
        predicate: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> &mut Self {
        self.register(
            AssertionCategory::Body,
            description,
            Check::Body(Box::new(move |body| {
                let text = std::str::from_utf8(body)?;
                Ok(Observed::from_bool(predicate(text), preview(body)))
            })),
        )
    }

    /// Check that the body equals `expected` exactly.
    pub fn body_equals(&mut self, expected: impl Into<String>) -> &mut Self {
        let expected = expected.into();
        let description = format!("body equals {expected:?}");
        self.body_utf8(description, move |text| text == expected)
    }

    /// Check that the deserialised body equals `expected` field for field.
    ///
    /// The body is decoded with the harness codec; decode failures record
    /// an internal error. On mismatch the message is enriched with the
    /// differ's report when one is configured.
    pub fn body_json_equals<T: Serialize>(&mut self, expected: &T) -> &mut Self {
        let codec = Arc::clone(&self.codec);
        let differ = self.differ.clone();
        let description = "deserialised body equals the expected object".to_string();
        match serde_json::to_value(expected) {
            Ok(expected) => self.register(
                AssertionCategory::Body,
                description,
                Check::Body(Box::new(move |body| {
                    let actual = codec.decode(body)?;
                    if actual == expected {
                        return Ok(Observed::from_bool(true, actual));
                    }
                    let mut value = actual.to_string();
                    if let Some(report) = differ
                        .as_deref()
                        .and_then(|d| d.difference(&expected, &actual))
                    {
                        value = format!("{value}; diff: {report}");
                    }
                    Ok(Observed {
                        passed: false,
                        value,
                    })
                })),
            ),
            // The expectation itself is unserialisable; surface that as an
            // internal error at evaluation time rather than panicking here.
            Err(cause) => {
                let cause = cause.to_string();
                self.register(
                    AssertionCategory::Body,
                    description,
                    Check::Body(Box::new(move |_| Err(cause.clone().into()))),
                )
            }
        }
    }

    /// Check whether the overall deadline elapsed.
    ///
    /// Evaluated with `false` at normal completion or `true` at the first
    /// detected timeout, never both.
    pub fn timed_out(&mut self, expected: bool) -> &mut Self {
        let description = if expected {
            "request exceeds its overall deadline"
        } else {
            "request finishes within its overall deadline"
        };
        self.register(
            AssertionCategory::Timeout,
            description,
            Check::Timeout(Box::new(move |elapsed| {
                Ok(Observed::from_bool(elapsed == expected, elapsed))
            })),
        )
    }

    /// Check the surfaced transport failure, when one occurs.
    pub fn thrown(
        &mut self,
        description: impl Into<String>,
        predicate: impl Fn(&TransportError) -> bool + Send + Sync + 'static,
    ) -> &mut Self {
        self.register(
            AssertionCategory::Thrown,
            description,
            Check::Thrown(Box::new(move |cause| {
                Ok(Observed::from_bool(predicate(cause), cause))
            })),
        )
    }
}

impl Default for Assertions {
    fn default() -> Self { Self::new() }
}

impl fmt::Debug for Assertions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Assertions")
            .field("severity", &self.severity)
            .field("specs", &self.specs)
            .finish_non_exhaustive()
    }
}

const PREVIEW_LIMIT: usize = 120;

/// Render body bytes for diagnostics, truncated to a sane length.
fn preview(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.chars().count() <= PREVIEW_LIMIT {
        format!("{text:?}")
    } else {
        let cut: String = text.chars().take(PREVIEW_LIMIT).collect();
        format!("{cut:?}… ({} bytes)", bytes.len())
    }
}

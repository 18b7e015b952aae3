//! Harness orchestration: building, launching, and awaiting probes.
//!
//! [`ProbeHarness`] is the public entry point. `launch` acquires a throttle
//! permit, registers a task, hands a fresh assertion pipeline to the
//! transport as response consumer, schedules the pipeline on the watchdog,
//! and returns a [`TestResults`] handle without awaiting. `test` is the
//! blocking convenience: it awaits completion and raises an aggregate error
//! when any fatal-severity assertion is not ok.

use std::{sync::Arc, time::Duration};

use http::{
    Version,
    header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue},
};
use tokio::time::Instant;

use crate::{
    assertion::{AssertionResult, Assertions},
    codec::{BodyCodec, JsonCodec},
    diff::{Differ, StructuralDiffer},
    error::HarnessError,
    pipeline::{AssertionPipeline, LaunchContext, ResultHook},
    readiness::ReadinessGate,
    report::ReportCollector,
    request::{Payload, ProbeRequest},
    results::{ResultsState, TestResults},
    task::TaskRegistry,
    throttle::Throttle,
    transport::{HttpTransport, ResponseConsumer, WireRequest},
    watchdog::{DEFAULT_INTERVAL, Watchdog},
};

const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(30);

/// Builder for [`ProbeHarness`].
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
///
/// use wireprobe::ProbeHarness;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), wireprobe::HarnessError> {
/// let harness = ProbeHarness::builder()
///     .finish_timeout(Duration::from_secs(10))
///     .throttle(8)
///     .build()?;
/// # let _ = harness;
/// # Ok(())
/// # }
/// ```
pub struct ProbeHarnessBuilder {
    transport: Option<Arc<dyn HttpTransport>>,
    codec: Arc<dyn BodyCodec>,
    differ: Option<Arc<dyn Differ>>,
    default_headers: HeaderMap,
    default_version: Option<Version>,
    default_start_timeout: Option<Duration>,
    default_finish_timeout: Option<Duration>,
    watchdog_interval: Duration,
    throttle: Option<Arc<Throttle>>,
    readiness: Option<ReadinessGate>,
    readiness_timeout: Duration,
    on_result: Option<ResultHook>,
}

impl ProbeHarnessBuilder {
    /// A builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            transport: None,
            codec: Arc::new(JsonCodec),
            differ: Some(Arc::new(StructuralDiffer)),
            default_headers: HeaderMap::new(),
            default_version: None,
            default_start_timeout: None,
            default_finish_timeout: None,
            watchdog_interval: DEFAULT_INTERVAL,
            throttle: None,
            readiness: None,
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
            on_result: None,
        }
    }

    /// Use the given transport instead of the default `reqwest` client.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replace the body codec.
    #[must_use]
    pub fn codec(mut self, codec: Arc<dyn BodyCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Replace the differ used to enrich object-equality failures.
    #[must_use]
    pub fn differ(mut self, differ: Arc<dyn Differ>) -> Self {
        self.differ = Some(differ);
        self
    }

    /// Drop the differ; equality failures then report values without a
    /// structural report.
    #[must_use]
    pub fn no_differ(mut self) -> Self {
        self.differ = None;
        self
    }

    /// Add a header applied to every request that does not set it itself.
    #[must_use]
    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    /// Replace the whole default header set.
    #[must_use]
    pub fn default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = headers;
        self
    }

    /// Preferred HTTP version for requests that do not choose one.
    #[must_use]
    pub fn http_version(mut self, version: Version) -> Self {
        self.default_version = Some(version);
        self
    }

    /// Default bound on time-to-first-byte.
    #[must_use]
    pub fn start_timeout(mut self, limit: Duration) -> Self {
        self.default_start_timeout = Some(limit);
        self
    }

    /// Default overall deadline enforced by the watchdog.
    #[must_use]
    pub fn finish_timeout(mut self, limit: Duration) -> Self {
        self.default_finish_timeout = Some(limit);
        self
    }

    /// Interval between watchdog scans.
    #[must_use]
    pub fn watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = interval;
        self
    }

    /// Bound simultaneous in-flight probes with a harness-owned pool.
    #[must_use]
    pub fn throttle(mut self, permits: usize) -> Self {
        self.throttle = Some(Arc::new(Throttle::new(permits)));
        self
    }

    /// Bound simultaneous in-flight probes with a pool shared across
    /// harnesses.
    #[must_use]
    pub fn shared_throttle(mut self, throttle: Arc<Throttle>) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// Block launches until this gate is signalled.
    #[must_use]
    pub fn readiness_gate(mut self, gate: ReadinessGate) -> Self {
        self.readiness = Some(gate);
        self
    }

    /// How long a launch may wait on the readiness gate before failing.
    #[must_use]
    pub fn readiness_timeout(mut self, limit: Duration) -> Self {
        self.readiness_timeout = limit;
        self
    }

    /// Invoke `hook` for every assertion result as it is produced, for
    /// live logging independent of final aggregation.
    #[must_use]
    pub fn on_result(mut self, hook: impl Fn(&AssertionResult) + Send + Sync + 'static) -> Self {
        self.on_result = Some(Arc::new(hook));
        self
    }

    /// Build the harness and start its watchdog.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Configuration`] when no transport was
    /// configured and the default one is unavailable.
    pub fn build(self) -> Result<ProbeHarness, HarnessError> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport()?,
        };
        let watchdog = Watchdog::spawn(self.watchdog_interval);
        Ok(ProbeHarness {
            inner: Arc::new(HarnessInner {
                transport,
                codec: self.codec,
                differ: self.differ,
                default_headers: self.default_headers,
                default_version: self.default_version,
                default_start_timeout: self.default_start_timeout,
                default_finish_timeout: self.default_finish_timeout,
                throttle: self.throttle,
                readiness: self.readiness,
                readiness_timeout: self.readiness_timeout,
                on_result: self.on_result,
                registry: Arc::new(TaskRegistry::new()),
                watchdog,
                report: Arc::new(ReportCollector::new()),
            }),
        })
    }
}

impl Default for ProbeHarnessBuilder {
    fn default() -> Self { Self::new() }
}

#[cfg(feature = "reqwest")]
fn default_transport() -> Result<Arc<dyn HttpTransport>, HarnessError> {
    crate::transport::ReqwestTransport::with_defaults()
        .map(|transport| Arc::new(transport) as Arc<dyn HttpTransport>)
        .map_err(|e| HarnessError::Configuration(e.to_string()))
}

#[cfg(not(feature = "reqwest"))]
fn default_transport() -> Result<Arc<dyn HttpTransport>, HarnessError> {
    Err(HarnessError::Configuration(
        "no transport configured and the `reqwest` feature is disabled".into(),
    ))
}

struct HarnessInner {
    transport: Arc<dyn HttpTransport>,
    codec: Arc<dyn BodyCodec>,
    differ: Option<Arc<dyn Differ>>,
    default_headers: HeaderMap,
    default_version: Option<Version>,
    default_start_timeout: Option<Duration>,
    default_finish_timeout: Option<Duration>,
    throttle: Option<Arc<Throttle>>,
    readiness: Option<ReadinessGate>,
    readiness_timeout: Duration,
    on_result: Option<ResultHook>,
    registry: Arc<TaskRegistry>,
    watchdog: Arc<Watchdog>,
    report: Arc<ReportCollector>,
}

impl Drop for HarnessInner {
    fn drop(&mut self) { self.watchdog.shutdown(); }
}

/// Test-execution engine for HTTP endpoints.
///
/// Cheap to clone; clones share the registry, throttle, watchdog, and
/// report.
#[derive(Clone)]
pub struct ProbeHarness {
    inner: Arc<HarnessInner>,
}

impl ProbeHarness {
    /// Start configuring a harness.
    #[must_use]
    pub fn builder() -> ProbeHarnessBuilder { ProbeHarnessBuilder::new() }

    /// Registry of every launched task.
    #[must_use]
    pub fn registry(&self) -> Arc<TaskRegistry> { Arc::clone(&self.inner.registry) }

    /// Run-wide report of completed probes.
    #[must_use]
    pub fn report(&self) -> Arc<ReportCollector> { Arc::clone(&self.inner.report) }

    /// Wait until every launched probe has settled.
    ///
    /// Returns `true` when the harness went quiet within `limit`; on
    /// timeout with `kill_on_timeout` set, stragglers are cancelled first.
    pub async fn quiesce(&self, limit: Duration, kill_on_timeout: bool) -> bool {
        self.inner.registry.await_quiet(limit, kill_on_timeout).await
    }

    /// Launch a probe without awaiting it.
    ///
    /// The call suspends only while waiting on the readiness gate or a
    /// throttle permit; once the request is on the wire it returns a
    /// [`TestResults`] handle that can be awaited, cancelled, or
    /// interrogated.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::NotReady`] when the readiness gate is not
    /// signalled in time, [`HarnessError::InvalidRequest`] when the
    /// request cannot be assembled, or a codec error when the JSON body
    /// cannot be encoded.
    pub async fn launch(
        &self,
        request: ProbeRequest,
        configure: impl FnOnce(&mut Assertions),
    ) -> Result<TestResults, HarnessError> {
        let inner = &self.inner;
        if let Some(gate) = &inner.readiness {
            gate.wait(inner.readiness_timeout).await?;
        }
        let permit = match &inner.throttle {
            Some(throttle) => {
                let queued = Instant::now();
                let permit = throttle.acquire().await;
                tracing::debug!(
                    probe = %request.display_name(),
                    waited = ?queued.elapsed(),
                    "throttle permit acquired"
                );
                Some(permit)
            }
            None => None,
        };

        let name = request.display_name();
        let (wire, finish_timeout) = self.assemble(request)?;
        let mut asserts =
            Assertions::with_collaborators(Arc::clone(&inner.codec), inner.differ.clone());
        configure(&mut asserts);
        tracing::debug!(
            probe = %name,
            method = %wire.method,
            url = %wire.url,
            assertions = asserts.len(),
            "launching probe"
        );

        let task = inner.registry.register(name.clone());
        let results = Arc::new(ResultsState::new(
            name,
            wire.method.clone(),
            wire.url.clone(),
            Arc::clone(&task),
        ));
        let pipeline = AssertionPipeline::new(
            asserts.into_specs(),
            LaunchContext {
                task: Arc::clone(&task),
                registry: Arc::clone(&inner.registry),
                results: Arc::clone(&results),
                report: Arc::clone(&inner.report),
                on_result: inner.on_result.clone(),
                permit,
                deadline: finish_timeout,
            },
        );
        if finish_timeout.is_some() {
            inner.watchdog.watch(&pipeline);
        }

        let consumer: Arc<dyn ResponseConsumer> = pipeline;
        let transport = Arc::clone(&inner.transport);
        let cancel = task.cancellation();
        tokio::spawn(async move {
            transport.execute(wire, consumer, cancel).await;
        });
        Ok(TestResults::new(results))
    }

    /// Launch a probe, await completion, and raise on fatal failures.
    ///
    /// # Errors
    ///
    /// Everything `launch` returns, plus [`HarnessError::Failed`]
    /// enumerating every fatal-severity result that is not ok.
    pub async fn test(
        &self,
        request: ProbeRequest,
        configure: impl FnOnce(&mut Assertions),
    ) -> Result<TestResults, HarnessError> {
        let results = self.launch(request, configure).await?;
        results.await_complete().await;
        results.assert_no_failures().await?;
        Ok(results)
    }

    fn assemble(&self, request: ProbeRequest) -> Result<(WireRequest, Option<Duration>), HarnessError> {
        let inner = &self.inner;
        if let Some(reason) = request.invalid {
            return Err(HarnessError::InvalidRequest(reason));
        }

        let mut headers = inner.default_headers.clone();
        for (name, value) in &request.headers {
            headers.insert(name.clone(), value.clone());
        }

        let body = match request.payload {
            Payload::Empty => None,
            Payload::Bytes(bytes) => Some(bytes),
            Payload::Json(value) => {
                let bytes = inner.codec.encode(&value)?;
                if !headers.contains_key(CONTENT_TYPE) {
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static(inner.codec.content_type()));
                }
                Some(bytes)
            }
        };

        let wire = WireRequest {
            method: request.method,
            url: request.url,
            version: request.version.or(inner.default_version),
            headers,
            body,
            start_timeout: request.start_timeout.or(inner.default_start_timeout),
        };
        let finish_timeout = request.finish_timeout.or(inner.default_finish_timeout);
        Ok((wire, finish_timeout))
    }
}

impl std::fmt::Debug for ProbeHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeHarness")
            .field("registry", &self.inner.registry)
            .field("throttled", &self.inner.throttle.is_some())
            .finish_non_exhaustive()
    }
}

//! Per-request streaming response consumer.
//!
//! The pipeline owns every assertion registered for one probe and produces
//! exactly one result per spec, whichever of the three termination paths
//! fires first: normal stream completion, a transport error callback, or a
//! watchdog-detected timeout. Resolution is a single compare-and-swap; each
//! terminal handler claims it before doing any resolution work and backs
//! off when another path already won.
//!
//! Once the timed-out flag is set, no body or chunk assertion is invoked
//! again: data delivered after timeout is discarded, not asserted upon.
//! Unevaluated specs are swept to `DidNotRun` on the winning path.

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use bytes::BytesMut;
use tokio::{sync::OwnedSemaphorePermit, time::Instant};

use crate::{
    assertion::{AssertionResult, AssertionSpec, Facet, Phase},
    report::ReportCollector,
    results::ResultsState,
    task::{Task, TaskRegistry},
    transport::{Directive, ResponseConsumer, ResponseHead, TransportError},
};

/// Callback invoked per result as it is produced, for live logging
/// independent of final aggregation.
pub(crate) type ResultHook = Arc<dyn Fn(&AssertionResult) + Send + Sync>;

/// Everything the pipeline needs to finalise a probe.
pub(crate) struct LaunchContext {
    pub(crate) task: Arc<Task>,
    pub(crate) registry: Arc<TaskRegistry>,
    pub(crate) results: Arc<ResultsState>,
    pub(crate) report: Arc<ReportCollector>,
    pub(crate) on_result: Option<ResultHook>,
    pub(crate) permit: Option<OwnedSemaphorePermit>,
    pub(crate) deadline: Option<Duration>,
}

struct Registered {
    spec: AssertionSpec,
    invoked: bool,
    /// Running combined outcome for chunk specs: first non-success latches,
    /// otherwise the latest success. Emitted once at resolution.
    chunk_outcome: Option<AssertionResult>,
}

struct PipelineInner {
    specs: Vec<Registered>,
    body: BytesMut,
    permit: Option<OwnedSemaphorePermit>,
    seen_cause: Option<TransportError>,
}

pub(crate) struct AssertionPipeline {
    inner: Mutex<PipelineInner>,
    resolved: AtomicBool,
    timed_out: AtomicBool,
    launched_at: Instant,
    deadline: Option<Duration>,
    task: Arc<Task>,
    registry: Arc<TaskRegistry>,
    results: Arc<ResultsState>,
    report: Arc<ReportCollector>,
    on_result: Option<ResultHook>,
}

impl AssertionPipeline {
    pub(crate) fn new(specs: Vec<AssertionSpec>, ctx: LaunchContext) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(PipelineInner {
                specs: specs
                    .into_iter()
                    .map(|spec| Registered {
                        spec,
                        invoked: false,
                        chunk_outcome: None,
                    })
                    .collect(),
                body: BytesMut::new(),
                permit: ctx.permit,
                seen_cause: None,
            }),
            resolved: AtomicBool::new(false),
            timed_out: AtomicBool::new(false),
            launched_at: Instant::now(),
            deadline: ctx.deadline,
            task: ctx.task,
            registry: ctx.registry,
            results: ctx.results,
            report: ctx.report,
            on_result: ctx.on_result,
        })
    }

    pub(crate) fn is_resolved(&self) -> bool { self.resolved.load(Ordering::Acquire) }

    /// Compare elapsed time against the configured overall deadline and
    /// force-terminate on overrun. Called by the watchdog on every scan and
    /// opportunistically after each chunk.
    ///
    /// Returns `true` when the deadline fired.
    pub(crate) fn check_deadline(&self) -> bool {
        match self.deadline {
            Some(limit)
                if !self.is_resolved() && self.launched_at.elapsed() >= limit =>
            {
                self.on_timeout();
                true
            }
            _ => false,
        }
    }

    /// Force-terminate this pipeline because its overall deadline elapsed.
    ///
    /// Idempotent; a second trigger (or a race with another termination
    /// path) is a no-op.
    pub(crate) fn on_timeout(&self) {
        if self
            .timed_out
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        if !self.begin_resolution() {
            return;
        }
        tracing::warn!(
            probe = self.results.name(),
            elapsed = ?self.launched_at.elapsed(),
            "overall deadline exceeded, aborting exchange"
        );
        let mut inner = self.lock();
        self.run_timeout_specs(&mut inner, true);
        // Cancelling after claiming resolution lets the transport's abort
        // echo arrive at an already-settled pipeline.
        self.task.cancel();
        self.flush_chunk_outcomes(&mut inner);
        self.sweep(&mut inner);
        self.finalize(&mut inner, false, None);
    }

    fn lock(&self) -> MutexGuard<'_, PipelineInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_resolution(&self) -> bool {
        self.resolved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn emit(&self, result: AssertionResult) {
        if let Some(hook) = &self.on_result {
            hook(&result);
        }
        tracing::debug!(probe = self.results.name(), %result, "assertion evaluated");
        self.results.push(result);
    }

    fn run_timeout_specs(&self, inner: &mut PipelineInner, elapsed: bool) {
        for reg in pending(inner, Phase::Timeout) {
            reg.invoked = true;
            let result = reg.spec.evaluate(&Facet::TimedOut(elapsed));
            self.emit(result);
        }
    }

    fn flush_chunk_outcomes(&self, inner: &mut PipelineInner) {
        for reg in &mut inner.specs {
            if let Some(result) = reg.chunk_outcome.take() {
                self.emit(result);
            }
        }
    }

    fn sweep(&self, inner: &mut PipelineInner) {
        for reg in inner.specs.iter_mut().filter(|reg| !reg.invoked) {
            reg.invoked = true;
            self.emit(reg.spec.did_not_run());
        }
    }

    fn finalize(&self, inner: &mut PipelineInner, errored: bool, body: Option<String>) {
        // Dropping the owned permit is the exactly-once throttle release;
        // only the winning termination path reaches this point.
        inner.permit.take();
        self.registry.mark_finished(&self.task, errored);
        self.results.settle(body);
        self.report.record(self.results.to_record());
        tracing::debug!(
            probe = self.results.name(),
            state = ?self.task.state(),
            duration = ?self.results.run_duration(),
            "probe resolved"
        );
        // Waking awaiters comes last so everything above is visible to
        // anyone the completion releases.
        self.results.notify_done();
    }
}

impl ResponseConsumer for AssertionPipeline {
    fn on_headers(&self, head: &ResponseHead) -> Directive {
        if self.is_resolved() || self.timed_out.load(Ordering::Acquire) {
            return Directive::Stop;
        }
        let mut inner = self.lock();
        if self.is_resolved() || self.timed_out.load(Ordering::Acquire) {
            return Directive::Stop;
        }
        for reg in pending(&mut inner, Phase::Head) {
            reg.invoked = true;
            let result = reg.spec.evaluate(&Facet::Head(head));
            self.emit(result);
        }
        Directive::Continue
    }

    fn on_chunk(&self, chunk: &[u8]) -> Directive {
        if self.is_resolved() || self.timed_out.load(Ordering::Acquire) {
            return Directive::Stop;
        }
        {
            let mut inner = self.lock();
            if self.is_resolved() || self.timed_out.load(Ordering::Acquire) {
                return Directive::Stop;
            }
            for reg in inner
                .specs
                .iter_mut()
                .filter(|reg| reg.spec.phase() == Phase::Chunk)
            {
                reg.invoked = true;
                let result = reg.spec.evaluate(&Facet::Chunk(chunk));
                match &reg.chunk_outcome {
                    // First non-success latches; later chunks cannot undo it.
                    Some(existing) if !existing.is_success() => {}
                    _ => reg.chunk_outcome = Some(result),
                }
            }
            inner.body.extend_from_slice(chunk);
        }
        // A slow trickle can stay ahead of the periodic scan; re-check here
        // so the deadline is enforced between watchdog ticks too.
        if self.check_deadline() {
            return Directive::Stop;
        }
        Directive::Continue
    }

    fn on_complete(&self) {
        if !self.begin_resolution() {
            return;
        }
        let mut inner = self.lock();
        let body = inner.body.split().freeze();
        self.flush_chunk_outcomes(&mut inner);
        for reg in pending(&mut inner, Phase::Body) {
            reg.invoked = true;
            let result = reg.spec.evaluate(&Facet::Body(&body[..]));
            self.emit(result);
        }
        if !self.timed_out.load(Ordering::Acquire) {
            self.run_timeout_specs(&mut inner, false);
        }
        // Thrown specs (and chunk specs on a chunkless body) never ran.
        self.sweep(&mut inner);
        let text = String::from_utf8_lossy(&body).into_owned();
        self.finalize(&mut inner, false, Some(text));
    }

    fn on_error(&self, cause: TransportError) {
        if self.is_resolved() {
            // Settled already: this is either the echo of our own forced
            // abort or a second report of the same failure.
            let duplicate = self.lock().seen_cause.as_ref() == Some(&cause);
            if self.timed_out.load(Ordering::Acquire) && cause.is_abort_artifact() {
                tracing::debug!(probe = self.results.name(), %cause, "abort echo after timeout");
            } else if duplicate {
                tracing::debug!(probe = self.results.name(), %cause, "duplicate failure report");
            } else {
                tracing::warn!(probe = self.results.name(), %cause, "failure after resolution");
            }
            return;
        }
        if !self.begin_resolution() {
            return;
        }
        let mut inner = self.lock();
        inner.seen_cause = Some(cause.clone());
        let start_timeout = cause.is_start_timeout();
        if start_timeout {
            // The server never answered within its deadline: timeout
            // semantics, not a transport failure.
            self.timed_out.store(true, Ordering::Release);
            self.run_timeout_specs(&mut inner, true);
            self.task.cancel();
        }
        for reg in pending(&mut inner, Phase::Thrown) {
            reg.invoked = true;
            let result = reg.spec.evaluate(&Facet::Thrown(&cause));
            self.emit(result);
        }
        self.flush_chunk_outcomes(&mut inner);
        self.sweep(&mut inner);
        self.finalize(&mut inner, !start_timeout, None);
    }
}

fn pending<'a>(
    inner: &'a mut PipelineInner,
    phase: Phase,
) -> impl Iterator<Item = &'a mut Registered> {
    inner
        .specs
        .iter_mut()
        .filter(move |reg| reg.spec.phase() == phase && !reg.invoked)
}

#[cfg(test)]
mod tests {
    use http::{HeaderMap, Method, StatusCode, Version};

    use super::*;
    use crate::assertion::{AssertionStatus, Assertions};

    fn pipeline(configure: impl FnOnce(&mut Assertions)) -> (Arc<AssertionPipeline>, Arc<ResultsState>) {
        let mut asserts = Assertions::new();
        configure(&mut asserts);
        let registry = Arc::new(TaskRegistry::new());
        let task = registry.register("unit probe");
        let results = Arc::new(ResultsState::new(
            "unit probe".into(),
            Method::GET,
            "http://localhost/unit".into(),
            Arc::clone(&task),
        ));
        let ctx = LaunchContext {
            task,
            registry,
            results: Arc::clone(&results),
            report: Arc::new(ReportCollector::new()),
            on_result: None,
            permit: None,
            deadline: None,
        };
        (AssertionPipeline::new(asserts.into_specs(), ctx), results)
    }

    fn head() -> ResponseHead {
        ResponseHead {
            status: StatusCode::OK,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
        }
    }

    #[tokio::test]
    async fn normal_completion_produces_one_result_per_spec() {
        let (pipeline, results) = pipeline(|a| {
            a.status_equals(StatusCode::OK)
                .body_equals("Hello world!")
                .timed_out(false);
        });
        assert_eq!(pipeline.on_headers(&head()), Directive::Continue);
        assert_eq!(pipeline.on_chunk(b"Hello "), Directive::Continue);
        assert_eq!(pipeline.on_chunk(b"world!"), Directive::Continue);
        pipeline.on_complete();

        let produced = results.snapshot();
        assert_eq!(produced.len(), 3);
        assert!(produced.iter().all(AssertionResult::is_success));
    }

    #[tokio::test]
    async fn second_termination_path_is_a_no_op() {
        let (pipeline, results) = pipeline(|a| {
            a.body_equals("once");
        });
        pipeline.on_headers(&head());
        pipeline.on_chunk(b"once");
        pipeline.on_complete();
        pipeline.on_error(TransportError::Io("late".into()));
        pipeline.on_complete();

        assert_eq!(results.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn data_after_timeout_is_discarded_not_asserted() {
        let (pipeline, results) = pipeline(|a| {
            a.timed_out(true);
            a.warning(|a| {
                a.body("must never run", |_| false)
                    .chunk("must never run either", |_| false);
            });
        });
        pipeline.on_headers(&head());
        pipeline.on_timeout();
        assert_eq!(pipeline.on_chunk(b"late data"), Directive::Stop);
        pipeline.on_complete();

        let produced = results.snapshot();
        assert_eq!(produced.len(), 3);
        for result in &produced {
            match result.category() {
                crate::assertion::AssertionCategory::Timeout => {
                    assert_eq!(result.status(), AssertionStatus::Success);
                }
                _ => assert_eq!(result.status(), AssertionStatus::DidNotRun),
            }
        }
    }

    #[tokio::test]
    async fn start_timeout_error_takes_the_timeout_path() {
        let (pipeline, results) = pipeline(|a| {
            a.timed_out(true)
                .thrown("cause is the start deadline", TransportError::is_start_timeout);
        });
        pipeline.on_error(TransportError::StartTimeout);

        let produced = results.snapshot();
        assert_eq!(produced.len(), 2);
        assert!(produced.iter().all(AssertionResult::is_success));
    }

    #[tokio::test]
    async fn chunk_outcome_latches_first_failure() {
        let (pipeline, results) = pipeline(|a| {
            a.chunk("every chunk is short", |chunk| chunk.len() <= 4);
        });
        pipeline.on_headers(&head());
        pipeline.on_chunk(b"ok");
        pipeline.on_chunk(b"too long");
        pipeline.on_chunk(b"ok");
        pipeline.on_complete();

        let produced = results.snapshot();
        assert_eq!(produced.len(), 1);
        assert_eq!(produced[0].status(), AssertionStatus::Failure);
    }
}

//! Live handle to one launched probe.
//!
//! [`TestResults`] is created at launch and completed when the pipeline
//! resolves. Results append as they are produced, so the handle can be
//! inspected mid-flight; the awaiting conveniences and the
//! `assert_no_matches` primitive wait for resolution first.

use std::{
    fmt,
    sync::{Arc, Mutex, OnceLock, PoisonError},
    time::Duration,
};

use http::Method;
use tokio::{sync::watch, time::Instant};

use crate::{
    assertion::{AssertionResult, AssertionStatus, Severity},
    error::{FailedAssertions, HarnessError},
    report::TestRecord,
    task::{Task, TaskState},
};

pub(crate) struct ResultsState {
    name: String,
    method: Method,
    uri: String,
    launched_at: Instant,
    task: Arc<Task>,
    results: Mutex<Vec<AssertionResult>>,
    body: OnceLock<String>,
    duration: OnceLock<Duration>,
    done: watch::Sender<bool>,
}

impl ResultsState {
    pub(crate) fn new(name: String, method: Method, uri: String, task: Arc<Task>) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            name,
            method,
            uri,
            launched_at: Instant::now(),
            task,
            results: Mutex::new(Vec::new()),
            body: OnceLock::new(),
            duration: OnceLock::new(),
            done,
        }
    }

    pub(crate) fn name(&self) -> &str { &self.name }

    pub(crate) fn push(&self, result: AssertionResult) {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(result);
    }

    pub(crate) fn snapshot(&self) -> Vec<AssertionResult> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record the final body and duration. The body text is only present
    /// on normal completion. Awaiters are not woken until
    /// [`notify_done`](Self::notify_done), so callers can finish report
    /// bookkeeping before anyone observes completion.
    pub(crate) fn settle(&self, body: Option<String>) {
        if let Some(text) = body {
            let _ = self.body.set(text);
        }
        let _ = self.duration.set(self.launched_at.elapsed());
    }

    /// Wake everything awaiting completion.
    pub(crate) fn notify_done(&self) { self.done.send_replace(true); }

    pub(crate) fn run_duration(&self) -> Duration {
        self.duration
            .get()
            .copied()
            .unwrap_or_else(|| self.launched_at.elapsed())
    }

    pub(crate) fn to_record(&self) -> TestRecord {
        TestRecord {
            name: self.name.clone(),
            method: self.method.clone(),
            uri: self.uri.clone(),
            duration: self.run_duration(),
            results: self.snapshot(),
        }
    }
}

/// Future-like handle returned by `launch`.
///
/// Cheap to clone; all clones observe the same underlying probe.
#[derive(Clone)]
pub struct TestResults {
    state: Arc<ResultsState>,
}

impl TestResults {
    pub(crate) fn new(state: Arc<ResultsState>) -> Self { Self { state } }

    /// Name assigned to the probe at launch.
    #[must_use]
    pub fn name(&self) -> &str { self.state.name() }

    /// Request method.
    #[must_use]
    pub fn method(&self) -> &Method { &self.state.method }

    /// Request URI.
    #[must_use]
    pub fn uri(&self) -> &str { &self.state.uri }

    /// Monotonic launch instant.
    #[must_use]
    pub fn launched_at(&self) -> Instant { self.state.launched_at }

    /// Lifecycle state of the underlying task.
    #[must_use]
    pub fn state(&self) -> TaskState { self.state.task.state() }

    /// Whether the probe has settled.
    #[must_use]
    pub fn is_complete(&self) -> bool { *self.state.done.borrow() }

    /// Running view of the probe's duration: elapsed-so-far while in
    /// flight, final duration once settled.
    #[must_use]
    pub fn run_duration(&self) -> Duration { self.state.run_duration() }

    /// Results produced so far (all of them once the probe has settled).
    #[must_use]
    pub fn all_results(&self) -> Vec<AssertionResult> { self.state.snapshot() }

    /// Body text, available after normal completion.
    #[must_use]
    pub fn body_text(&self) -> Option<&str> { self.state.body.get().map(String::as_str) }

    /// Request cancellation of the probe.
    ///
    /// Returns `true` on the first call that actually requests it, `false`
    /// afterwards.
    pub fn cancel(&self) -> bool { self.state.task.cancel() }

    /// Wait for the probe to settle.
    pub async fn await_complete(&self) {
        let mut done = self.state.done.subscribe();
        // The sender lives in `self.state`, so `wait_for` cannot observe a
        // closed channel while this handle exists.
        let _ = done.wait_for(|settled| *settled).await;
    }

    /// Wait for the probe to settle, failing after `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::AwaitTimeout`] when `limit` elapses first.
    pub async fn await_timeout(&self, limit: Duration) -> Result<(), HarnessError> {
        tokio::time::timeout(limit, self.await_complete())
            .await
            .map_err(|_| HarnessError::AwaitTimeout)
    }

    /// Wait for completion, then fail if any result matches `predicate`.
    ///
    /// This is the primitive behind [`assert_no_failures`] and
    /// [`assert_all_succeeded`]; the raised error enumerates every
    /// matching result.
    ///
    /// [`assert_no_failures`]: TestResults::assert_no_failures
    /// [`assert_all_succeeded`]: TestResults::assert_all_succeeded
    ///
    /// # Errors
    ///
    /// Returns [`FailedAssertions`] listing every matching result.
    pub async fn assert_no_matches(
        &self,
        predicate: impl Fn(&AssertionResult) -> bool,
    ) -> Result<(), FailedAssertions> {
        self.await_complete().await;
        let offending: Vec<_> = self
            .state
            .snapshot()
            .into_iter()
            .filter(|result| predicate(result))
            .collect();
        if offending.is_empty() {
            Ok(())
        } else {
            Err(FailedAssertions::new(self.state.name(), offending))
        }
    }

    /// Fail when any fatal-severity result is a failure or internal error.
    ///
    /// Warning-severity results and swept `DidNotRun` outcomes are
    /// reported, never raised.
    ///
    /// # Errors
    ///
    /// Returns [`FailedAssertions`] listing the fatal offenders.
    pub async fn assert_no_failures(&self) -> Result<(), FailedAssertions> {
        self.assert_no_matches(|result| {
            result.severity() == Severity::Fatal
                && matches!(
                    result.status(),
                    AssertionStatus::Failure | AssertionStatus::InternalError
                )
        })
        .await
    }

    /// Fail when any result of any severity is not a success.
    ///
    /// # Errors
    ///
    /// Returns [`FailedAssertions`] listing every non-success result.
    pub async fn assert_all_succeeded(&self) -> Result<(), FailedAssertions> {
        self.assert_no_matches(|result| !result.is_success()).await
    }
}

impl fmt::Debug for TestResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestResults")
            .field("name", &self.state.name)
            .field("method", &self.state.method)
            .field("uri", &self.state.uri)
            .field("state", &self.state.task.state())
            .field("complete", &self.is_complete())
            .finish()
    }
}

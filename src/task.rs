//! Bookkeeping for launched operations.
//!
//! Every launched probe is tracked as a [`Task`]: a cancellable, queryable
//! handle that stays in the [`TaskRegistry`] after completion so late
//! reporting can still interrogate it. The registry also maintains the
//! running count used by [`TaskRegistry::await_quiet`] to wait out
//! asynchronous settling after cancellation.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use tokio::{sync::Notify, time::Instant};
use tokio_util::sync::CancellationToken;

/// Identifier assigned to a launched task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl From<u64> for TaskId {
    fn from(value: u64) -> Self { Self(value) }
}

impl TaskId {
    /// Create a new [`TaskId`] with the provided value.
    #[must_use]
    pub fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

/// Lifecycle state of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// The operation is in flight.
    Running,
    /// Cancellation was requested; the operation has not yet confirmed.
    CancelPending,
    /// The operation settled after a cancellation request.
    Cancelled,
    /// The operation completed normally.
    Done,
    /// The operation completed with a failure.
    Errored,
}

const RUNNING: u8 = 0;
const CANCEL_PENDING: u8 = 1;
const CANCELLED: u8 = 2;
const DONE: u8 = 3;
const ERRORED: u8 = 4;

fn decode_state(raw: u8) -> TaskState {
    match raw {
        CANCEL_PENDING => TaskState::CancelPending,
        CANCELLED => TaskState::Cancelled,
        DONE => TaskState::Done,
        ERRORED => TaskState::Errored,
        _ => TaskState::Running,
    }
}

/// Handle to one launched network operation.
pub struct Task {
    id: TaskId,
    description: String,
    started_at: Instant,
    state: AtomicU8,
    cancel_requested: AtomicBool,
    finished: AtomicBool,
    token: CancellationToken,
}

impl Task {
    fn new(id: TaskId, description: String) -> Self {
        Self {
            id,
            description,
            started_at: Instant::now(),
            state: AtomicU8::new(RUNNING),
            cancel_requested: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            token: CancellationToken::new(),
        }
    }

    /// Registry-assigned identifier.
    #[must_use]
    pub fn id(&self) -> TaskId { self.id }

    /// Human-readable description supplied at launch.
    #[must_use]
    pub fn description(&self) -> &str { &self.description }

    /// Monotonic launch instant.
    #[must_use]
    pub fn started_at(&self) -> Instant { self.started_at }

    /// Time elapsed since launch.
    #[must_use]
    pub fn elapsed(&self) -> Duration { self.started_at.elapsed() }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState { decode_state(self.state.load(Ordering::Acquire)) }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool { self.cancel_requested.load(Ordering::Acquire) }

    /// Token observed by the transport driving this task's exchange.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken { self.token.clone() }

    /// Request cancellation of the underlying operation.
    ///
    /// Idempotent: returns `true` only on the call that flips the cancel
    /// flag. Cancellation does not synchronously settle the task; the
    /// pipeline's termination path finalises the state.
    pub fn cancel(&self) -> bool {
        if self.finished.load(Ordering::Acquire) {
            return false;
        }
        if self
            .cancel_requested
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let _ = self.state.compare_exchange(
            RUNNING,
            CANCEL_PENDING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.token.cancel();
        true
    }

    /// Move to a terminal state. Returns `true` on the transition that
    /// actually finished the task; later calls are no-ops.
    pub(crate) fn finish(&self, errored: bool) -> bool {
        if self
            .finished
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let terminal = if self.cancel_requested.load(Ordering::Acquire) {
            CANCELLED
        } else if errored {
            ERRORED
        } else {
            DONE
        };
        self.state.store(terminal, Ordering::Release);
        true
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Concurrent registry of every launched task.
///
/// Completed tasks remain queryable for the registry's lifetime; only the
/// running count is decremented as completion signals arrive.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: DashMap<TaskId, Arc<Task>>,
    next_id: AtomicU64,
    running: AtomicUsize,
    quiesced: Notify,
}

impl TaskRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Track a newly launched operation.
    pub fn register(&self, description: impl Into<String>) -> Arc<Task> {
        let id = TaskId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let task = Arc::new(Task::new(id, description.into()));
        self.tasks.insert(id, Arc::clone(&task));
        self.running.fetch_add(1, Ordering::AcqRel);
        task
    }

    /// Completion signal for a registered task. Decrements the running
    /// count exactly once per task, whatever mix of termination paths
    /// fires, and wakes quiescence waiters at zero.
    pub(crate) fn mark_finished(&self, task: &Task, errored: bool) {
        if task.finish(errored) && self.running.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.quiesced.notify_waiters();
        }
    }

    /// Look up a task by id.
    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<Arc<Task>> {
        self.tasks.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshot of every tracked task, completed ones included.
    #[must_use]
    pub fn tasks(&self) -> Vec<Arc<Task>> {
        self.tasks
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Number of tasks that have not yet reached a terminal state.
    #[must_use]
    pub fn running_count(&self) -> usize { self.running.load(Ordering::Acquire) }

    /// Request cancellation of every tracked task.
    ///
    /// Returns the tasks whose cancel flag this call actually flipped; a
    /// task finishing concurrently is not counted.
    pub fn cancel_all(&self) -> Vec<Arc<Task>> {
        self.tasks
            .iter()
            .filter(|entry| entry.value().cancel())
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Drop every task that has reached a terminal state.
    pub fn clear_finished(&self) {
        self.tasks
            .retain(|_, task| !task.finished.load(Ordering::Acquire));
    }

    /// Wait until every tracked task has settled, or `limit` elapses.
    ///
    /// Returns `true` when the registry went quiet in time. On timeout with
    /// `kill_on_timeout` set, the stragglers are cancelled before
    /// returning `false`; their completion signals still arrive
    /// asynchronously.
    pub async fn await_quiet(&self, limit: Duration, kill_on_timeout: bool) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            let quiesced = self.quiesced.notified();
            if self.running.load(Ordering::Acquire) == 0 {
                return true;
            }
            tokio::select! {
                () = quiesced => {}
                () = tokio::time::sleep_until(deadline) => {
                    if self.running.load(Ordering::Acquire) == 0 {
                        return true;
                    }
                    if kill_on_timeout {
                        let killed = self.cancel_all();
                        log::warn!(
                            "registry still busy after {limit:?}; cancelled {} task(s)",
                            killed.len()
                        );
                    }
                    return false;
                }
            }
        }
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tracked", &self.tasks.len())
            .field("running", &self.running_count())
            .finish()
    }
}

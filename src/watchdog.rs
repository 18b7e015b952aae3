//! Periodic enforcement of overall per-request deadlines.
//!
//! The watchdog bounds the *entire* request-through-completion duration,
//! independently of the transport's own start timeout. It holds weak
//! references so a settled pipeline is pruned rather than kept alive, and
//! it keeps scanning for the harness lifetime: a request whose deadline
//! elapses between two chunks is caught within one scan interval even if no
//! further chunk ever arrives.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::pipeline::AssertionPipeline;

/// Default scan interval.
pub(crate) const DEFAULT_INTERVAL: Duration = Duration::from_millis(120);

pub(crate) struct Watchdog {
    entries: Mutex<Vec<Weak<AssertionPipeline>>>,
    shutdown: CancellationToken,
}

impl Watchdog {
    /// Start the scanner on its own task.
    ///
    /// Must be called within a Tokio runtime.
    pub(crate) fn spawn(interval: Duration) -> Arc<Self> {
        let watchdog = Arc::new(Self {
            entries: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
        });
        tokio::spawn(Arc::clone(&watchdog).run(interval));
        watchdog
    }

    /// Schedule a pipeline for deadline checks.
    pub(crate) fn watch(&self, pipeline: &Arc<AssertionPipeline>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::downgrade(pipeline));
    }

    /// Stop the scanner task.
    pub(crate) fn shutdown(&self) { self.shutdown.cancel(); }

    async fn run(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                _ = ticker.tick() => self.scan(),
            }
        }
    }

    fn scan(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|weak| match weak.upgrade() {
            Some(pipeline) => {
                pipeline.check_deadline();
                !pipeline.is_resolved()
            }
            None => false,
        });
    }
}

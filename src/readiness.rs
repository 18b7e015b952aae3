//! Readiness gating for launches.

use std::time::Duration;

use tokio::sync::watch;

use crate::error::HarnessError;

/// Cloneable gate the environment signals once the system under test is
/// accepting traffic. While unsignalled, launches block (bounded) instead
/// of probing a half-started server.
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    ready: watch::Sender<bool>,
}

impl ReadinessGate {
    /// A gate that starts unsignalled.
    #[must_use]
    pub fn new() -> Self {
        let (ready, _) = watch::channel(false);
        Self { ready }
    }

    /// Mark the system under test as ready. Idempotent.
    pub fn signal_ready(&self) { self.ready.send_replace(true); }

    /// Whether the gate has been signalled.
    #[must_use]
    pub fn is_ready(&self) -> bool { *self.ready.borrow() }

    /// Wait until signalled, failing after `limit`.
    pub(crate) async fn wait(&self, limit: Duration) -> Result<(), HarnessError> {
        let mut ready = self.ready.subscribe();
        tokio::time::timeout(limit, ready.wait_for(|signalled| *signalled))
            .await
            .map_err(|_| HarnessError::NotReady(limit))?
            .map_err(|_| HarnessError::NotReady(limit))?;
        Ok(())
    }
}

impl Default for ReadinessGate {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn wait_fails_when_never_signalled() {
        let gate = ReadinessGate::new();
        let outcome = gate.wait(Duration::from_millis(100)).await;
        assert!(matches!(outcome, Err(HarnessError::NotReady(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_returns_once_signalled() {
        let gate = ReadinessGate::new();
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        gate.signal_ready();
        assert!(waiter.await.expect("join waiter").is_ok());
        assert!(gate.is_ready());
    }
}

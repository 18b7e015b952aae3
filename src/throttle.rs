//! Bounded-concurrency permit pool.
//!
//! An optional throttle caps how many probes are in flight at once. The
//! launcher suspends on [`Throttle::acquire`]; the permit is owned, travels
//! with the pipeline, and is dropped exactly once on the resolution path,
//! whichever termination source wins. The throttle is an injected resource:
//! give each harness its own, or share one `Arc` across several.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting permit pool bounding simultaneous in-flight probes.
#[derive(Debug)]
pub struct Throttle {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl Throttle {
    /// A pool with `permits` slots.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            capacity: permits,
        }
    }

    /// Total number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize { self.capacity }

    /// Slots currently free.
    #[must_use]
    pub fn available(&self) -> usize { self.semaphore.available_permits() }

    /// Wait for a free slot.
    pub(crate) async fn acquire(&self) -> OwnedSemaphorePermit {
        match Arc::clone(&self.semaphore).acquire_owned().await {
            Ok(permit) => permit,
            // The semaphore is never closed while the throttle exists.
            Err(_) => unreachable!("throttle semaphore closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn acquire_suspends_until_a_permit_frees() {
        let throttle = Arc::new(Throttle::new(1));
        let held = throttle.acquire().await;
        assert_eq!(throttle.available(), 0);

        let waiter = {
            let throttle = Arc::clone(&throttle);
            tokio::spawn(async move {
                throttle.acquire().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.expect("waiter acquires after release");
    }
}

//! Counting admission gate bounding how many batches run at once.
//!
//! Built on `tokio::sync::Semaphore`, whose waiters are served in FIFO order:
//! a freed permit goes to the longest-waiting caller, so no batch is starved
//! while others cycle faster. Permit counters are tracked with lock-free
//! atomics for stats and assertions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::core::SchedulerError;

struct GateInner {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    /// Permits currently handed out.
    in_use: AtomicUsize,
    /// Highest value `in_use` ever reached.
    peak: AtomicUsize,
}

/// Counting semaphore with FIFO hand-off. Cheap to clone.
#[derive(Clone)]
pub struct AdmissionGate {
    inner: Arc<GateInner>,
}

impl std::fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("capacity", &self.inner.capacity)
            .field("in_use", &self.in_use())
            .finish()
    }
}

impl AdmissionGate {
    /// Create a gate with `capacity` permits (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(GateInner {
                semaphore: Arc::new(Semaphore::new(capacity)),
                capacity,
                in_use: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        }
    }

    /// Suspend until a permit is free.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::ShuttingDown` once the gate has been closed.
    pub async fn acquire(&self) -> Result<GatePermit, SchedulerError> {
        let permit = Arc::clone(&self.inner.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| SchedulerError::ShuttingDown)?;
        let now = self.inner.in_use.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.peak.fetch_max(now, Ordering::AcqRel);
        tracing::debug!(in_use = now, capacity = self.inner.capacity, "gate permit acquired");
        Ok(GatePermit {
            permit: Some(permit),
            gate: Arc::clone(&self.inner),
        })
    }

    /// Reject current and future waiters.
    pub fn close(&self) {
        self.inner.semaphore.close();
    }

    /// Configured permit count.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Permits currently held.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.inner.in_use.load(Ordering::Acquire)
    }

    /// Permits free right now.
    #[must_use]
    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    /// Highest number of permits held at once.
    #[must_use]
    pub fn peak_in_use(&self) -> usize {
        self.inner.peak.load(Ordering::Acquire)
    }
}

/// A held gate permit. Released explicitly or on drop, exactly once.
pub struct GatePermit {
    permit: Option<OwnedSemaphorePermit>,
    gate: Arc<GateInner>,
}

impl GatePermit {
    /// Return the permit to the gate. Returns `false` if already released.
    pub fn release(&mut self) -> bool {
        let Some(permit) = self.permit.take() else {
            return false;
        };
        let left = self.gate.in_use.fetch_sub(1, Ordering::AcqRel) - 1;
        drop(permit);
        tracing::debug!(in_use = left, "gate permit released");
        true
    }

    /// Whether this permit is still held.
    #[must_use]
    pub const fn is_held(&self) -> bool {
        self.permit.is_some()
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn release_is_idempotent() {
        let gate = AdmissionGate::new(1);
        let mut permit = gate.acquire().await.unwrap();
        assert_eq!(gate.available(), 0);
        assert!(permit.release());
        assert!(!permit.release());
        drop(permit);
        assert_eq!(gate.available(), 1);
        assert_eq!(gate.in_use(), 0);
    }

    #[tokio::test]
    async fn zero_capacity_is_raised_to_one() {
        let gate = AdmissionGate::new(0);
        assert_eq!(gate.capacity(), 1);
    }

    #[tokio::test]
    async fn closed_gate_rejects_waiters() {
        let gate = AdmissionGate::new(1);
        let _held = gate.acquire().await.unwrap();
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        gate.close();
        assert!(matches!(waiter.await.unwrap(), Err(SchedulerError::ShuttingDown)));
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_are_served_in_arrival_order() {
        let gate = AdmissionGate::new(1);
        let first = gate.acquire().await.unwrap();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut waiters = Vec::new();
        for i in 0..4 {
            let gate = gate.clone();
            let order = Arc::clone(&order);
            waiters.push(tokio::spawn(async move {
                let _permit = gate.acquire().await.unwrap();
                order.lock().push(i);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }));
            // let each waiter enqueue before the next one arrives
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        drop(first);
        for waiter in waiters {
            waiter.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
        assert_eq!(gate.peak_in_use(), 1);
    }
}

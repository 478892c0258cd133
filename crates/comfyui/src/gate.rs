//! Process-wide cap on in-flight image generations.
//!
//! [`AdmissionGate`] is a stable handle around a replaceable semaphore.
//! Resizing swaps in a fresh semaphore under a mutex: later acquisitions
//! see the new capacity, while permits already handed out keep pointing
//! at the old one and release into it when dropped.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Right to run one generation call. Released on drop.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug)]
struct GateState {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

#[derive(Debug)]
pub struct AdmissionGate {
    state: Mutex<GateState>,
}

impl AdmissionGate {
    /// A gate admitting `capacity` holders at once (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(GateState {
                semaphore: Arc::new(Semaphore::new(capacity)),
                capacity,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Holders of the current semaphore. Permits from before the last
    /// resize are not counted.
    pub fn in_flight(&self) -> usize {
        let state = self.lock();
        state
            .capacity
            .saturating_sub(state.semaphore.available_permits())
    }

    /// Replace the semaphore when `capacity` differs from the current one.
    /// Returns whether a swap happened.
    pub fn resize(&self, capacity: usize) -> bool {
        let capacity = capacity.max(1);
        let mut state = self.lock();
        if state.capacity == capacity {
            return false;
        }
        tracing::info!(from = state.capacity, to = capacity, "Resizing admission gate");
        *state = GateState {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        };
        true
    }

    /// Wait up to `timeout` for a permit. `None` means the gate stayed
    /// saturated for the whole wait.
    pub async fn acquire(&self, timeout: Duration) -> Option<AdmissionPermit> {
        let semaphore = Arc::clone(&self.lock().semaphore);
        match tokio::time::timeout(timeout, semaphore.acquire_owned()).await {
            Ok(Ok(permit)) => Some(AdmissionPermit { _permit: permit }),
            Ok(Err(_closed)) => None,
            Err(_elapsed) => None,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_secs(30);

    // -- acquire --

    #[tokio::test(start_paused = true)]
    async fn permits_are_bounded_and_released_on_drop() {
        let gate = AdmissionGate::new(2);
        let a = gate.acquire(WAIT).await.unwrap();
        let _b = gate.acquire(WAIT).await.unwrap();
        assert_eq!(gate.in_flight(), 2);

        assert!(gate.acquire(Duration::from_secs(1)).await.is_none());

        drop(a);
        assert_eq!(gate.in_flight(), 1);
        assert!(gate.acquire(WAIT).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_is_admitted_when_holder_releases() {
        let gate = Arc::new(AdmissionGate::new(1));
        let held = gate.acquire(WAIT).await.unwrap();

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.acquire(WAIT).await.is_some() })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(held);

        assert!(waiter.await.unwrap());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        assert_eq!(AdmissionGate::new(0).capacity(), 1);
    }

    // -- resize --

    #[tokio::test(start_paused = true)]
    async fn resize_applies_to_new_acquisitions_only() {
        let gate = AdmissionGate::new(1);
        let old = gate.acquire(WAIT).await.unwrap();

        assert!(gate.resize(3));
        assert!(!gate.resize(3));
        assert_eq!(gate.capacity(), 3);
        assert_eq!(gate.in_flight(), 0);

        let _p1 = gate.acquire(WAIT).await.unwrap();
        let _p2 = gate.acquire(WAIT).await.unwrap();
        let _p3 = gate.acquire(WAIT).await.unwrap();
        assert!(gate.acquire(Duration::from_secs(1)).await.is_none());

        // Dropping a permit of the replaced semaphore must not free a slot
        // in the new one.
        drop(old);
        assert_eq!(gate.in_flight(), 3);
    }
}

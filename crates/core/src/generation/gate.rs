//! Process-wide bound on simultaneously outstanding provider jobs.
//!
//! The provider enforces one queue-depth limit per account no matter which
//! local caller submitted a job, so the bound lives in a shared
//! [`ConcurrencyRegistry`] instead of on each orchestrator.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::Lazy;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::info;

use crate::metrics;

use super::types::GenerationError;

static GLOBAL_REGISTRY: Lazy<ConcurrencyRegistry> = Lazy::new(ConcurrencyRegistry::new);

/// A permit pool with in-flight instrumentation.
#[derive(Debug)]
pub struct ConcurrencyGate {
    bound: usize,
    semaphore: Arc<Semaphore>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ConcurrencyGate {
    /// Create a gate allowing `bound` holders at once (at least one).
    pub fn new(bound: usize) -> Self {
        let bound = bound.max(1);
        Self {
            bound,
            semaphore: Arc::new(Semaphore::new(bound)),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn bound(&self) -> usize {
        self.bound
    }

    /// Wait for a permit. The permit is returned when the guard drops.
    pub async fn acquire(self: &Arc<Self>) -> Result<GatePermit, GenerationError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| GenerationError::GateClosed)?;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        metrics::GATE_IN_FLIGHT.inc();

        Ok(GatePermit {
            _permit: permit,
            gate: Arc::clone(self),
        })
    }

    /// Permits currently held.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of permits ever held at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Scoped permit from a [`ConcurrencyGate`].
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    gate: Arc<ConcurrencyGate>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.in_flight.fetch_sub(1, Ordering::SeqCst);
        metrics::GATE_IN_FLIGHT.dec();
    }
}

/// Owner of the shared gate.
///
/// Clones share the same slot. [`ConcurrencyRegistry::global`] is the
/// process-wide instance; tests build their own with [`ConcurrencyRegistry::new`].
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyRegistry {
    slot: Arc<Mutex<Option<Arc<ConcurrencyGate>>>>,
}

impl ConcurrencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the process-wide registry.
    pub fn global() -> Self {
        GLOBAL_REGISTRY.clone()
    }

    /// Get the gate for `bound`, building it on first use.
    ///
    /// Asking for a different bound replaces the installed gate. Permits held
    /// on the old gate stay there and do not count against the new one.
    pub fn gate(&self, bound: usize) -> Arc<ConcurrencyGate> {
        let bound = bound.max(1);
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(gate) = slot.as_ref() {
            if gate.bound() == bound {
                return Arc::clone(gate);
            }
            info!(
                "Rebuilding concurrency gate: bound {} -> {} ({} permits still held on old gate)",
                gate.bound(),
                bound,
                gate.in_flight()
            );
        } else {
            info!("Creating concurrency gate with bound {}", bound);
        }

        let gate = Arc::new(ConcurrencyGate::new(bound));
        *slot = Some(Arc::clone(&gate));
        gate
    }

    /// The installed gate, if any.
    pub fn current(&self) -> Option<Arc<ConcurrencyGate>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_registry_reuses_gate_for_same_bound() {
        let registry = ConcurrencyRegistry::new();
        assert!(registry.current().is_none());

        let a = registry.gate(3);
        let b = registry.gate(3);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.bound(), 3);
    }

    #[test]
    fn test_registry_rebuilds_on_new_bound() {
        let registry = ConcurrencyRegistry::new();
        let a = registry.gate(3);
        let b = registry.gate(2);
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(b.bound(), 2);
        assert!(Arc::ptr_eq(&registry.current().unwrap(), &b));
    }

    #[test]
    fn test_registry_clones_share_gate() {
        let registry = ConcurrencyRegistry::new();
        let clone = registry.clone();
        let a = registry.gate(4);
        let b = clone.gate(4);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_zero_bound_clamped_to_one() {
        let gate = ConcurrencyGate::new(0);
        assert_eq!(gate.bound(), 1);
        assert_eq!(gate.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_permit_released_on_drop() {
        let gate = Arc::new(ConcurrencyGate::new(2));

        let first = gate.acquire().await.unwrap();
        let second = gate.acquire().await.unwrap();
        assert_eq!(gate.in_flight(), 2);
        assert_eq!(gate.available_permits(), 0);

        drop(first);
        assert_eq!(gate.in_flight(), 1);
        assert_eq!(gate.available_permits(), 1);

        drop(second);
        assert_eq!(gate.in_flight(), 0);
        assert_eq!(gate.peak_in_flight(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_never_exceeds_bound() {
        let gate = Arc::new(ConcurrencyGate::new(3));

        let tasks = (0..12u64).map(|i| {
            let gate = Arc::clone(&gate);
            async move {
                let _permit = gate.acquire().await.unwrap();
                assert!(gate.in_flight() <= 3);
                tokio::time::sleep(Duration::from_millis(10 + i * 7)).await;
            }
        });
        futures::future::join_all(tasks).await;

        assert_eq!(gate.in_flight(), 0);
        assert_eq!(gate.peak_in_flight(), 3);
    }
}

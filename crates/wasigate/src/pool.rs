//! Pool of independent guest instances.
//!
//! A guest has one linear memory and one allocator, so a dispatch cycle is a
//! critical section per instance. Parallelism comes only from holding several
//! instances; each sits behind its own mutex and at most one cycle runs
//! against it at a time.
//!
//! Any cycle error leaves the instance's allocator in an unknown state. The
//! instance is dropped and a fresh one is built from the factory before the
//! slot is used again. The same mechanism enforces deadlines: an interrupted
//! guest is never resumed, only replaced.

use crate::adapter;
use crate::error::{BoundaryError, Result};
use crate::guest::GuestExports;
use crate::message::{Request, Response};

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use tracing::{debug, error, info};

/// Builds a fresh guest instance for a pool slot.
pub type GuestFactory<G> = Box<dyn Fn() -> Result<G> + Send + Sync>;

/// Counters describing pool activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    /// Cycles that returned a response
    pub cycles: u64,
    /// Cycles that ended in an error
    pub failures: u64,
    /// Instances built to replace discarded ones
    pub reinstantiations: u64,
}

/// A fixed set of guest instances serving requests in parallel.
pub struct InstancePool<G> {
    slots: Vec<Mutex<Option<G>>>,
    factory: GuestFactory<G>,
    cursor: AtomicUsize,
    cycles: AtomicU64,
    failures: AtomicU64,
    reinstantiations: AtomicU64,
}

impl<G: GuestExports + Send> InstancePool<G> {
    /// Build a pool of `size` instances (at least one).
    ///
    /// Every instance is created up front, so a guest that cannot be
    /// instantiated fails here rather than on the first request.
    pub fn new(size: usize, factory: impl Fn() -> Result<G> + Send + Sync + 'static) -> Result<Self> {
        let size = size.max(1);
        let slots = (0..size)
            .map(|_| factory().map(|guest| Mutex::new(Some(guest))))
            .collect::<Result<Vec<_>>>()?;

        info!(size, "guest instance pool ready");

        Ok(Self {
            slots,
            factory: Box::new(factory),
            cursor: AtomicUsize::new(0),
            cycles: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            reinstantiations: AtomicU64::new(0),
        })
    }

    /// Number of instances.
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Snapshot of the pool counters.
    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            cycles: self.cycles.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            reinstantiations: self.reinstantiations.load(Ordering::Relaxed),
        }
    }

    /// Run one cycle on a free instance, blocking until one is available.
    pub fn handle(&self, request: &Request) -> Result<Response> {
        let (index, mut slot) = self.acquire();

        let guest = match slot.take() {
            Some(guest) => guest,
            None => {
                info!(slot = index, "reinstantiating guest");
                match (self.factory)() {
                    Ok(fresh) => {
                        self.reinstantiations.fetch_add(1, Ordering::Relaxed);
                        fresh
                    }
                    Err(e) => {
                        self.failures.fetch_add(1, Ordering::Relaxed);
                        error!(slot = index, error = %e, "reinstantiation failed");
                        return Err(e);
                    }
                }
            }
        };
        let guest = slot.insert(guest);

        let result = adapter::handle(guest, request);
        match &result {
            Ok(_) => {
                self.cycles.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                if e.poisons_instance() {
                    error!(slot = index, error = %e, "cycle failed, discarding guest instance");
                    *slot = None;
                }
            }
        }
        result
    }

    /// Run one cycle on tokio's blocking pool.
    ///
    /// A dispatch call cannot be interrupted: dropping the returned future does
    /// not stop the cycle, it runs to completion and its result is discarded.
    pub async fn handle_async(self: Arc<Self>, request: Request) -> Result<Response>
    where
        G: 'static,
    {
        tokio::task::spawn_blocking(move || self.handle(&request))
            .await
            .map_err(|e| BoundaryError::TaskFailed(e.to_string()))?
    }

    /// Pick the first idle slot starting from the round-robin cursor, or wait
    /// on the cursor's slot if every instance is busy.
    fn acquire(&self) -> (usize, MutexGuard<'_, Option<G>>) {
        let n = self.slots.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % n;

        for offset in 0..n {
            let index = (start + offset) % n;
            match self.slots[index].try_lock() {
                Ok(guard) => return (index, guard),
                Err(TryLockError::Poisoned(poisoned)) => {
                    return (index, self.recover(index, poisoned.into_inner()));
                }
                Err(TryLockError::WouldBlock) => continue,
            }
        }

        debug!(slot = start, "all guest instances busy, waiting");
        match self.slots[start].lock() {
            Ok(guard) => (start, guard),
            Err(poisoned) => (start, self.recover(start, poisoned.into_inner())),
        }
    }

    /// A panic mid-cycle poisons the slot; its guest cannot be trusted.
    fn recover<'a>(
        &'a self,
        index: usize,
        mut guard: MutexGuard<'a, Option<G>>,
    ) -> MutexGuard<'a, Option<G>> {
        error!(slot = index, "guest slot poisoned by a panic, discarding instance");
        *guard = None;
        self.slots[index].clear_poison();
        guard
    }
}

//! Fixed-capacity table of connected domains' worker contexts.

use crate::error::EngineError;
use crate::worker::DomainContext;
use std::sync::Arc;
use std::sync::Mutex;
use xsd_watch::{DomId, DomainDirectory};

/// Holds at most `dom_max` domains at a time, matching the real platform's
/// fixed-size stack slot table. A `Mutex`-guarded `Vec` is the simplest
/// correct option at this scale — lookups and allocation are rare compared
/// to the per-domain request traffic that runs off to the side on each
/// domain's own worker thread.
pub struct WorkerPool {
    slots: Mutex<Vec<Option<Arc<DomainContext>>>>,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        Self { slots: Mutex::new(vec![None; capacity]) }
    }

    /// Claims a free slot for `ctx`. Fails if the pool is full or the
    /// domain is already present.
    pub fn allocate(&self, ctx: Arc<DomainContext>) -> Result<(), EngineError> {
        let mut slots = self.slots.lock().unwrap();
        if slots.iter().flatten().any(|c| c.domid() == ctx.domid()) {
            return Err(EngineError::AlreadyRunning);
        }
        match slots.iter().position(Option::is_none) {
            Some(idx) => {
                slots[idx] = Some(ctx);
                Ok(())
            }
            None => Err(EngineError::PoolFull),
        }
    }

    /// Frees `domid`'s slot, if occupied.
    pub fn free(&self, domid: DomId) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.iter_mut().find(|s| matches!(s, Some(c) if c.domid() == domid)) {
            *slot = None;
        }
    }

    pub fn get(&self, domid: DomId) -> Option<Arc<DomainContext>> {
        self.slots.lock().unwrap().iter().flatten().find(|c| c.domid() == domid).cloned()
    }

    pub fn occupied_count(&self) -> usize {
        self.slots.lock().unwrap().iter().filter(|s| s.is_some()).count()
    }
}

impl DomainDirectory for WorkerPool {
    fn wake(&self, domid: DomId) {
        if let Some(ctx) = self.get(domid) {
            ctx.wake_handle().post();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::DomainContext;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use xsd_ring::{EventChannel, RingPage, SMALL_RING_CONFIG};

    struct CountingChannel(AtomicUsize);
    impl EventChannel for CountingChannel {
        fn notify(&self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn ctx(domid: DomId) -> Arc<DomainContext> {
        let page = Arc::new(RingPage::new(SMALL_RING_CONFIG));
        let notifier = Arc::new(CountingChannel(AtomicUsize::new(0)));
        Arc::new(DomainContext::new(domid, page, notifier))
    }

    #[test]
    fn allocate_fills_slots_then_reports_full() {
        let pool = WorkerPool::new(2);
        assert!(pool.allocate(ctx(1)).is_ok());
        assert!(pool.allocate(ctx(2)).is_ok());
        assert_eq!(pool.allocate(ctx(3)).unwrap_err(), EngineError::PoolFull);
    }

    #[test]
    fn allocate_rejects_duplicate_domid() {
        let pool = WorkerPool::new(2);
        pool.allocate(ctx(1)).unwrap();
        assert_eq!(pool.allocate(ctx(1)).unwrap_err(), EngineError::AlreadyRunning);
    }

    #[test]
    fn free_then_allocate_reuses_the_slot() {
        let pool = WorkerPool::new(1);
        pool.allocate(ctx(1)).unwrap();
        pool.free(1);
        assert_eq!(pool.occupied_count(), 0);
        assert!(pool.allocate(ctx(2)).is_ok());
    }

    #[test]
    fn wake_posts_the_domain_wake_semaphore() {
        let pool = WorkerPool::new(1);
        let c = ctx(7);
        let wake = c.wake_handle();
        pool.allocate(c).unwrap();
        pool.wake(7);
        // post() leaves the semaphore signalled; wait() would return immediately.
        wake.wait();
    }
}

//! Orchestration facade: owns the tree, the watch registry, and the
//! worker pool, and runs domains through their start/stop lifecycle.

use crate::config::Config;
use crate::error::EngineError;
use crate::pool::WorkerPool;
use crate::worker::{run_worker_loop, DomainContext, WorkerState};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use xsd_ring::{EventChannel, RingPage};
use xsd_store::{StoreError, Tree};
use xsd_watch::{DomId, WatchRegistry};

/// `domid` attributed to in-process callers of [`XenstoreEngine::write`]/
/// [`XenstoreEngine::rm`] that sit outside the message loop — there is no
/// connected domain to blame the mutation on, so it never matches a real
/// watcher's own-write exclusion in [`crate::proto`]'s dispatch handlers.
const LIBRARY_CALLER_DOMID: DomId = 0;

/// The whole in-guest store: tree, watch fan-out, and the pool of
/// connected domains' worker contexts.
pub struct XenstoreEngine {
    tree: Tree,
    watches: WatchRegistry,
    pool: WorkerPool,
    config: Config,
    handles: Mutex<HashMap<DomId, JoinHandle<()>>>,
}

impl XenstoreEngine {
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            tree: Tree::new(),
            watches: WatchRegistry::new(),
            pool: WorkerPool::new(config.dom_max()),
            config,
            handles: Mutex::new(HashMap::new()),
        })
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn watches(&self) -> &WatchRegistry {
        &self.watches
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn config(&self) -> Config {
        self.config
    }

    /// Writes `value` at `path` and fires watchers as caller-domid 0, in one
    /// call — unlike `xsd_store::xss_write`, which only mutates the tree,
    /// since `xsd-store` sits below the watch registry in the workspace's
    /// dependency order and can't call into it itself.
    pub fn write(&self, path: &str, value: &[u8]) -> Result<(), StoreError> {
        self.tree.write(path, value)?;
        self.watches.fire(path, LIBRARY_CALLER_DOMID, &self.pool);
        Ok(())
    }

    /// Removes the subtree at `path` and fires watchers as caller-domid 0 if
    /// anything was removed. Returns whether anything was removed.
    pub fn rm(&self, path: &str) -> bool {
        let removed = self.tree.remove(path);
        if removed {
            self.watches.fire(path, LIBRARY_CALLER_DOMID, &self.pool);
        }
        removed
    }

    /// Starts a domain: claims a pool slot, spawns its worker thread, and
    /// returns the shared context. On any failure, resources already
    /// claimed in this call are released before returning the error.
    pub fn start_domain(
        self: &Arc<Self>,
        domid: DomId,
        page: Arc<RingPage>,
        notifier: Arc<dyn EventChannel>,
    ) -> Result<Arc<DomainContext>, EngineError> {
        let ctx = Arc::new(DomainContext::new(domid, page, notifier));
        self.pool.allocate(Arc::clone(&ctx))?;

        let engine = Arc::clone(self);
        let worker_ctx = Arc::clone(&ctx);
        let spawned = std::thread::Builder::new()
            .name(format!("xsd-worker-{domid}"))
            .spawn(move || {
                run_worker_loop(&worker_ctx, &engine);
                engine.watches().purge_domain(worker_ctx.domid());
                worker_ctx.set_state(WorkerState::Stopped);
            });

        match spawned {
            Ok(handle) => {
                self.handles.lock().unwrap().insert(domid, handle);
                Ok(ctx)
            }
            Err(_) => {
                self.pool.free(domid);
                Err(EngineError::SpawnFailed)
            }
        }
    }

    /// Stops a running domain: signals its worker to exit, joins the
    /// thread, and frees its pool slot. Cleanup of the domain's watches
    /// and pending events happens inside the worker thread itself, as
    /// the last thing it does before returning.
    pub fn stop_domain(&self, domid: DomId) -> Result<(), EngineError> {
        let ctx = self.pool.get(domid).ok_or(EngineError::NotRunning)?;
        ctx.set_state(WorkerState::Stopping);
        ctx.request_stop();

        if let Some(handle) = self.handles.lock().unwrap().remove(&domid) {
            let _ = handle.join();
        }
        self.pool.free(domid);
        Ok(())
    }
}

//! Per-domain worker: the domain context, its wake semaphore, and the
//! request/reply/watch-drain loop that runs on its own OS thread.

use crate::dispatch::dispatch;
use crate::proto::XsdError;
use crate::XenstoreEngine;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use xsd_ring::{read_message, write_message, EventChannel, Message, RingPage};
use xsd_watch::DomId;

/// State machine a domain context passes through over its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// A binary wake semaphore: posted when the worker should re-check the
/// ring or its pending watch events, waited on when it has nothing to do.
///
/// The standard-library equivalent of an async runtime's notify handle,
/// translated to this system's preemptive-thread model.
pub struct WakeSemaphore {
    signalled: Mutex<bool>,
    cv: Condvar,
}

impl Default for WakeSemaphore {
    fn default() -> Self {
        Self::new()
    }
}

impl WakeSemaphore {
    pub fn new() -> Self {
        Self { signalled: Mutex::new(false), cv: Condvar::new() }
    }

    pub fn post(&self) {
        let mut signalled = self.signalled.lock().unwrap();
        *signalled = true;
        self.cv.notify_one();
    }

    /// Blocks until posted. Consumes the signal (binary, not counting).
    pub fn wait(&self) {
        let mut signalled = self.signalled.lock().unwrap();
        while !*signalled {
            signalled = self.cv.wait(signalled).unwrap();
        }
        *signalled = false;
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingTxnEnd {
    req_id: u32,
}

/// Everything a connected domain's worker owns for its lifetime.
///
/// Owned by its worker thread; referenced (never owned) elsewhere via
/// `Arc` so the worker pool and watch fan-out can look it up by `domid`
/// without holding a raw back-pointer.
pub struct DomainContext {
    domid: DomId,
    page: Arc<RingPage>,
    notifier: Arc<dyn EventChannel>,
    wake: Arc<WakeSemaphore>,
    stop: AtomicBool,
    state: Mutex<WorkerState>,
    txn_counter: AtomicU64,
    current_txn_id: AtomicU64,
    pending_txn_end: Mutex<Option<PendingTxnEnd>>,
}

impl DomainContext {
    pub fn new(domid: DomId, page: Arc<RingPage>, notifier: Arc<dyn EventChannel>) -> Self {
        page.set_server_features(xsd_ring::SERVER_FEATURE_RECONNECTION);
        page.set_connection(xsd_ring::CONNECTION_CONNECTED);
        Self {
            domid,
            page,
            notifier,
            wake: Arc::new(WakeSemaphore::new()),
            stop: AtomicBool::new(false),
            state: Mutex::new(WorkerState::Starting),
            txn_counter: AtomicU64::new(0),
            current_txn_id: AtomicU64::new(0),
            pending_txn_end: Mutex::new(None),
        }
    }

    pub fn domid(&self) -> DomId {
        self.domid
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn set_state(&self, state: WorkerState) {
        *self.state.lock().unwrap() = state;
    }

    /// A handle an out-of-scope event-channel callback (or a simulator
    /// standing in for one) posts when the peer writes into the ring.
    pub fn wake_handle(&self) -> Arc<WakeSemaphore> {
        Arc::clone(&self.wake)
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.wake.post();
    }

    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn in_transaction(&self) -> bool {
        self.current_txn_id.load(Ordering::Relaxed) != 0
    }
}

/// Runs a domain's worker loop until its stop flag is set, then returns —
/// callers are responsible for running this on its own thread and for
/// running domain/watch cleanup afterward.
pub fn run_worker_loop(ctx: &DomainContext, engine: &XenstoreEngine) {
    ctx.set_state(WorkerState::Running);

    loop {
        if ctx.should_stop() {
            break;
        }

        // Step 1: emit any deferred TRANSACTION_END reply.
        if let Some(pending) = ctx.pending_txn_end.lock().unwrap().take() {
            ctx.current_txn_id.store(0, Ordering::Relaxed);
            let reply = Message::new(u32::from(crate::proto::Opcode::TransactionEnd), pending.req_id, 0, Vec::new());
            write_message(&ctx.page, ctx.notifier.as_ref(), &reply);
        }

        // Step 2: drain pending watch events, unless a transaction is active.
        if !ctx.in_transaction() {
            for (reported_path, token) in engine.watches().drain_for(ctx.domid) {
                let mut payload = Vec::with_capacity(reported_path.len() + token.len() + 2);
                payload.extend_from_slice(reported_path.as_bytes());
                payload.push(0);
                payload.extend_from_slice(&token);
                payload.push(0);
                let reply = Message::new(u32::from(crate::proto::Opcode::WatchEvent), 0, 0, payload);
                write_message(&ctx.page, ctx.notifier.as_ref(), &reply);
            }
        }

        if ctx.should_stop() {
            break;
        }

        // Step 3: block only if the request ring is actually empty
        // (`req_prod <= req_cons`). An edge-triggered notify coalesces: the
        // peer may have written two requests before a single wake, and
        // blocking unconditionally here would strand the second one until
        // some unrelated future post.
        if !ctx.page.has_request() {
            ctx.wake.wait();
            if ctx.should_stop() {
                break;
            }
        }

        // Steps 4-5: assemble one request. A `None` is a spurious wake.
        let message = match read_message(&ctx.page, ctx.notifier.as_ref()) {
            Ok(Some(msg)) => msg,
            Ok(None) => continue,
            Err(xsd_ring::FrameError::TooBig { header, len }) => {
                // The header decoded fine, so req_id/tx_id are known — reply
                // E2BIG rather than silently dropping the request.
                eprintln!("xsd-engine: oversized payload ({len} bytes) from domain {}", ctx.domid);
                let reply = Message::new(u32::from(crate::proto::Opcode::Error), header.req_id, header.tx_id, XsdError::E2big.wire_bytes().to_vec());
                write_message(&ctx.page, ctx.notifier.as_ref(), &reply);
                continue;
            }
            Err(xsd_ring::FrameError::Stalled { .. }) => {
                // The peer started a frame but never finished delivering the
                // payload — unframed to the point that no reply is owed
                // (best-effort per the wire contract).
                eprintln!("xsd-engine: stalled frame from domain {}", ctx.domid);
                continue;
            }
        };

        // Step 6: dispatch and reply. A `None` means the reply was
        // deliberately deferred (TRANSACTION_END, emitted at step 1 of a
        // later iteration). write_message() notifies the peer after the
        // header and again after the payload (step 7).
        let reply = match dispatch(&message, ctx, engine) {
            Ok(Some(reply)) => Some(reply),
            Ok(None) => None,
            Err(err) => Some(error_reply(&message, err)),
        };
        if let Some(reply) = reply {
            write_message(&ctx.page, ctx.notifier.as_ref(), &reply);
        }
    }
}

pub(crate) fn error_reply(request: &Message, err: XsdError) -> Message {
    Message::new(
        u32::from(crate::proto::Opcode::Error),
        request.header.req_id,
        request.header.tx_id,
        err.wire_bytes().to_vec(),
    )
}

pub(crate) fn set_pending_txn_end(ctx: &DomainContext, req_id: u32) {
    *ctx.pending_txn_end.lock().unwrap() = Some(PendingTxnEnd { req_id });
}

pub(crate) fn start_transaction(ctx: &DomainContext) -> Result<u64, XsdError> {
    if ctx.in_transaction() {
        return Err(XsdError::Ebusy);
    }
    let id = ctx.txn_counter.fetch_add(1, Ordering::Relaxed) + 1;
    ctx.current_txn_id.store(id, Ordering::Relaxed);
    Ok(id)
}

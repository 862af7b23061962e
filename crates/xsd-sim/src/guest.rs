use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use xsd_engine::{EngineError, Opcode, WakeSemaphore, XenstoreEngine};
use xsd_ring::{Backoff, Config, EventChannel, Header, Message, RingPage, HEADER_LEN};
use xsd_watch::DomId;

/// Posts a domain's own wake semaphore when the store notifies its peer —
/// the in-process stand-in for the event-channel callback a real platform
/// binds, outside this crate's scope, via `bind(remote_domid, remote_port,
/// callback, ctx)`.
struct GuestChannel {
    wake: Arc<WakeSemaphore>,
}

impl EventChannel for GuestChannel {
    fn notify(&self) {
        self.wake.post();
    }
}

/// An in-process domain peer: owns its side of a [`RingPage`] and drives
/// requests/replies the way a real guest kernel's xenbus driver would,
/// without any of the hypercall or event-channel plumbing that requires an
/// actual hypervisor underneath it.
pub struct SimGuest {
    page: Arc<RingPage>,
    guest_wake: Arc<WakeSemaphore>,
    store_wake: Arc<WakeSemaphore>,
    domid: DomId,
    next_req_id: AtomicU32,
}

impl SimGuest {
    /// Starts a domain on `engine` and returns a guest-side handle wired to
    /// its ring, mirroring the sequence a real connect goes through: map
    /// the ring page, bind an event channel, spawn the worker.
    pub fn connect(engine: &Arc<XenstoreEngine>, domid: DomId, ring_config: Config) -> Result<Self, EngineError> {
        let page = Arc::new(RingPage::new(ring_config));
        let guest_wake = Arc::new(WakeSemaphore::new());
        let notifier: Arc<dyn EventChannel> = Arc::new(GuestChannel {
            wake: Arc::clone(&guest_wake),
        });
        let ctx = engine.start_domain(domid, Arc::clone(&page), notifier)?;
        Ok(Self {
            page,
            guest_wake,
            store_wake: ctx.wake_handle(),
            domid,
            next_req_id: AtomicU32::new(1),
        })
    }

    pub fn domid(&self) -> DomId {
        self.domid
    }

    /// Sends one request and blocks until its matching reply arrives,
    /// skipping over any `WATCH_EVENT` frames interleaved ahead of it: a
    /// peer must tolerate arbitrary interleaving of replies and watch
    /// events on the same ring. Tests asserting on watch delivery use
    /// [`SimGuest::recv_blocking`] directly instead.
    pub fn request(&self, opcode: Opcode, payload: &[u8]) -> Message {
        let req_id = self.next_req_id.fetch_add(1, Ordering::Relaxed);
        self.send_raw(opcode, req_id, 0, payload);
        loop {
            let msg = self.recv_blocking();
            if msg.header.req_id == req_id {
                return msg;
            }
        }
    }

    /// Sends a raw request frame without waiting for a reply.
    pub fn send_raw(&self, opcode: Opcode, req_id: u32, tx_id: u32, payload: &[u8]) {
        self.write_raw(opcode, req_id, tx_id, payload);
        // Real guests wake the store through the bound event channel;
        // here that's the domain worker's own semaphore, handed back from
        // `XenstoreEngine::start_domain`.
        self.store_wake.post();
    }

    /// Writes a request frame into the ring without posting the store's
    /// wake semaphore. Lets a caller enqueue several requests and notify
    /// only once, reproducing the edge-triggered coalesced-notify case a
    /// real event channel can deliver.
    pub fn write_raw(&self, opcode: Opcode, req_id: u32, tx_id: u32, payload: &[u8]) {
        let msg = Message::new(u32::from(opcode), req_id, tx_id, payload.to_vec());
        let mut buf = Vec::with_capacity(HEADER_LEN + msg.payload.len());
        buf.extend_from_slice(&msg.header.encode());
        buf.extend_from_slice(&msg.payload);
        write_all(&self.page, &buf);
    }

    /// Posts the store's wake semaphore without writing anything, pairing
    /// with [`SimGuest::write_raw`] to notify once after several writes.
    pub fn notify_store(&self) {
        self.store_wake.post();
    }

    /// Blocks for the next frame the store emits on this domain's ring,
    /// whatever its type.
    pub fn recv_blocking(&self) -> Message {
        loop {
            if let Some(msg) = self.try_recv() {
                return msg;
            }
            self.guest_wake.wait();
        }
    }

    /// Non-blocking attempt to assemble one frame from the reply side.
    /// Returns `None` if nothing has arrived yet.
    pub fn try_recv(&self) -> Option<Message> {
        let mut header_buf = [0u8; HEADER_LEN];
        let mut filled = 0usize;
        let mut backoff = Backoff::new();
        while filled < HEADER_LEN {
            let n = self.page.read_reply(&mut header_buf[filled..]);
            if n == 0 {
                if filled == 0 {
                    return None;
                }
                backoff.snooze();
                continue;
            }
            filled += n;
            backoff.reset();
        }

        let header = Header::decode(&header_buf);
        let mut payload = vec![0u8; header.len as usize];
        let mut got = 0usize;
        while got < payload.len() {
            let n = self.page.read_reply(&mut payload[got..]);
            if n == 0 {
                backoff.snooze();
                continue;
            }
            got += n;
            backoff.reset();
        }

        Some(Message { header, payload })
    }
}

fn write_all(page: &RingPage, mut buf: &[u8]) {
    let mut backoff = Backoff::new();
    while !buf.is_empty() {
        let n = page.inject_request(buf);
        if n == 0 {
            backoff.snooze();
            continue;
        }
        buf = &buf[n..];
        backoff.reset();
    }
}

//! Shared-memory split ring transport.
//!
//! # Memory ordering & synchronization strategy
//!
//! This follows the usual SPSC discipline, but for a byte-oriented,
//! page-shaped ring instead of a generic slot magazine:
//!
//! - Within this process exactly one thread (the domain's worker) ever calls
//!   [`RingPage::read`] or [`RingPage::write`] for a given page — the other
//!   side of the ring lives in a different domain, reached only through
//!   shared memory and the event-channel notification, never through a
//!   second Rust thread in this address space.
//! - `req_prod`/`rsp_cons` are **peer-owned**: this side only ever loads them,
//!   with `Acquire`, to synchronize-with the peer's `Release` store.
//! - `req_cons`/`rsp_prod` are **our-owned**: we load them `Relaxed` (nothing
//!   else in this process writes them) and publish updates with `Release`,
//!   so the peer's next `Acquire` load observes the bytes we just wrote.
//! - The byte regions themselves are plain (non-atomic) memory; the
//!   Acquire/Release pairing on the indices is what prevents the compiler
//!   (and the CPU) from reordering the byte copies around the index publish.
use crate::config::Config;
use crate::invariants::{debug_assert_indices_bounded, debug_assert_monotonic};
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

/// Bit 0 of `server_features`: the server supports reconnection.
pub const SERVER_FEATURE_RECONNECTION: u32 = 1 << 0;

/// `connection` word value meaning the ring is connected.
pub const CONNECTION_CONNECTED: u32 = 0;

/// Notifies the peer domain that new bytes are available.
///
/// Stands in for the event-channel `notify(local_port)` primitive, which
/// lives outside this crate's scope; real callers inject a handle bound to
/// their domain's event channel, tests inject an in-process stub.
pub trait EventChannel: Send + Sync {
    fn notify(&self);
}

/// A shared ring page, foreign-owned in production (mapped via a `map()`
/// primitive outside this crate's scope) and heap-owned when simulated
/// in-process (see `xsd-sim`).
///
/// `#[repr(C)]` matches the wire layout; field order must not change.
#[repr(C)]
pub struct RingPage {
    req: UnsafeCell<Box<[u8]>>,
    rsp: UnsafeCell<Box<[u8]>>,
    req_cons: CachePadded<AtomicU32>,
    req_prod: CachePadded<AtomicU32>,
    rsp_cons: CachePadded<AtomicU32>,
    rsp_prod: CachePadded<AtomicU32>,
    server_features: AtomicU32,
    connection: AtomicU32,
    config: Config,
}

// Safety: all mutable state is either behind an atomic or accessed by the
// single worker thread that owns this page for its lifetime; see module docs.
unsafe impl Send for RingPage {}
unsafe impl Sync for RingPage {}

impl RingPage {
    /// Creates a fresh, zeroed, connected ring page of the given configuration.
    ///
    /// Used by `xsd-sim` to stand in for a foreign-mapped page; real guests
    /// obtain their page through the out-of-scope `map()` primitive instead.
    pub fn new(config: Config) -> Self {
        let size = config.ring_size();
        Self {
            req: UnsafeCell::new(vec![0u8; size].into_boxed_slice()),
            rsp: UnsafeCell::new(vec![0u8; size].into_boxed_slice()),
            req_cons: CachePadded::new(AtomicU32::new(0)),
            req_prod: CachePadded::new(AtomicU32::new(0)),
            rsp_cons: CachePadded::new(AtomicU32::new(0)),
            rsp_prod: CachePadded::new(AtomicU32::new(0)),
            server_features: AtomicU32::new(SERVER_FEATURE_RECONNECTION),
            connection: AtomicU32::new(CONNECTION_CONNECTED),
            config,
        }
    }

    #[inline]
    pub fn config(&self) -> Config {
        self.config
    }

    #[inline]
    pub fn server_features(&self) -> u32 {
        self.server_features.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_server_features(&self, bits: u32) {
        self.server_features.store(bits, Ordering::Relaxed);
    }

    #[inline]
    pub fn connection(&self) -> u32 {
        self.connection.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_connection(&self, word: u32) {
        self.connection.store(word, Ordering::Relaxed);
    }

    /// `indices_ok(cons, prod)`: `prod - cons <= RING_SIZE`.
    #[inline]
    pub fn indices_ok(&self, cons: u32, prod: u32) -> bool {
        (prod.wrapping_sub(cons) as usize) <= self.config.ring_size()
    }

    // -------------------------------------------------------------------
    // Request side (peer -> us): we are the consumer.
    // -------------------------------------------------------------------

    /// `req_prod != req_cons`: whether the request side has unread bytes.
    ///
    /// Lets a worker check the ring before giving up its turn to the wake
    /// semaphore, instead of blocking unconditionally and stranding a second
    /// coalesced notification's worth of requests.
    #[inline]
    pub fn has_request(&self) -> bool {
        let cons = self.req_cons.load(Ordering::Relaxed);
        let prod = self.req_prod.load(Ordering::Acquire);
        prod != cons
    }

    /// Copies up to `buf.len()` bytes from the request ring, advancing our
    /// consumer index. Returns the number of bytes actually copied.
    ///
    /// A return of 0 means no data was available (`prod == cons`); this
    /// nudges the peer via `notifier` before returning, in case the peer is
    /// itself waiting on backpressure.
    ///
    /// Callers loop until they have assembled the length they need (header,
    /// then payload) — a single call may return fewer bytes than requested.
    pub fn read(&self, notifier: &dyn EventChannel, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }

        let cons = self.req_cons.load(Ordering::Relaxed);
        let prod = self.req_prod.load(Ordering::Acquire);

        let avail = prod.wrapping_sub(cons) as usize;
        if avail == 0 {
            notifier.notify();
            return 0;
        }

        let n = avail.min(buf.len());
        let mask = self.config.mask();
        let size = self.config.ring_size();
        // SAFETY: this side is the sole reader of `req`; the Acquire load
        // above synchronizes-with the peer's Release store of `req_prod`,
        // so every byte in [cons, prod) is visible here.
        let req = unsafe { &*self.req.get() };
        copy_wrapping(req, (cons & mask) as usize, buf, n, size);

        let new_cons = cons.wrapping_add(n as u32);
        debug_assert_monotonic!("req_cons", cons, new_cons);
        self.req_cons.store(new_cons, Ordering::Release);

        n
    }

    // -------------------------------------------------------------------
    // Reply side (us -> peer): we are the producer.
    // -------------------------------------------------------------------

    /// Copies `buf` into the reply ring, advancing our producer index.
    ///
    /// Returns the number of bytes actually written, which may be less than
    /// `buf.len()` if the ring lacks space; callers loop and notify the peer
    /// after each completed logical reply.
    ///
    /// Self-heals a corrupted reply-side index pair — if `prod - cons`
    /// exceeds capacity, both indices are reset to zero — before computing
    /// available space, since the peer is untrusted and could otherwise
    /// wedge this side forever.
    pub fn write(&self, buf: &[u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }

        let prod = self.rsp_prod.load(Ordering::Relaxed);
        let cons = self.rsp_cons.load(Ordering::Acquire);

        if !self.indices_ok(cons, prod) {
            eprintln!("xsd-ring: reply ring indices corrupt (prod={prod} cons={cons}), resetting");
            self.rsp_cons.store(0, Ordering::Relaxed);
            self.rsp_prod.store(0, Ordering::Release);
            return 0;
        }
        debug_assert_indices_bounded!(prod, cons, self.config.ring_size());

        let size = self.config.ring_size();
        let space = size - (prod.wrapping_sub(cons) as usize);
        if space == 0 {
            return 0;
        }

        let n = space.min(buf.len());
        let mask = self.config.mask();
        // SAFETY: this side is the sole writer of `rsp`; slots [prod, prod+n)
        // are beyond what the peer has declared consumed (checked above).
        let rsp = unsafe { &mut *self.rsp.get() };
        write_wrapping(rsp, (prod & mask) as usize, &buf[..n], size);

        let new_prod = prod.wrapping_add(n as u32);
        debug_assert_monotonic!("rsp_prod", prod, new_prod);
        self.rsp_prod.store(new_prod, Ordering::Release);

        n
    }

    /// Injects bytes directly into the request side, advancing `req_prod`.
    ///
    /// Real guests never call this — their peer domain is the one writing
    /// into `req` through shared memory. This exists for simulators (and
    /// benchmarks) that stand in for the peer domain in-process.
    pub fn inject_request(&self, buf: &[u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }

        let prod = self.req_prod.load(Ordering::Relaxed);
        let cons = self.req_cons.load(Ordering::Acquire);
        let size = self.config.ring_size();
        let space = size - (prod.wrapping_sub(cons) as usize);
        if space == 0 {
            return 0;
        }

        let n = space.min(buf.len());
        let mask = self.config.mask();
        let req = unsafe { &mut *self.req.get() };
        write_wrapping(req, (prod & mask) as usize, &buf[..n], size);

        let new_prod = prod.wrapping_add(n as u32);
        debug_assert_monotonic!("req_prod", prod, new_prod);
        self.req_prod.store(new_prod, Ordering::Release);

        n
    }

    /// Copies up to `buf.len()` bytes out of the reply side, advancing
    /// `rsp_cons`. This is the guest's own read primitive — the mirror image
    /// of [`RingPage::read`] on the other side of the connection.
    ///
    /// Real guests implement this in their own xenbus driver, against their
    /// own copy of the mapped page; it lives here, alongside
    /// [`RingPage::inject_request`], for `xsd-sim`'s in-process guest peer to
    /// call against the same page the store's worker is driving.
    pub fn read_reply(&self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }

        let cons = self.rsp_cons.load(Ordering::Relaxed);
        let prod = self.rsp_prod.load(Ordering::Acquire);

        let avail = prod.wrapping_sub(cons) as usize;
        if avail == 0 {
            return 0;
        }

        let n = avail.min(buf.len());
        let mask = self.config.mask();
        let size = self.config.ring_size();
        // SAFETY: the guest peer is the sole reader of `rsp`; the Acquire
        // load above synchronizes-with the store's Release store of
        // `rsp_prod`.
        let rsp = unsafe { &*self.rsp.get() };
        copy_wrapping(rsp, (cons & mask) as usize, buf, n, size);

        let new_cons = cons.wrapping_add(n as u32);
        debug_assert_monotonic!("rsp_cons", cons, new_cons);
        self.rsp_cons.store(new_cons, Ordering::Release);

        n
    }

    /// Test-only helper: copies whatever is pending in `rsp` into `req`, so a
    /// single page can stand in for both ends of a connection in unit tests
    /// that don't need two real domains.
    #[cfg(test)]
    pub(crate) fn test_relay_rsp_to_req(&self) {
        let prod = self.rsp_prod.load(Ordering::Relaxed);
        let cons = self.rsp_cons.load(Ordering::Relaxed);
        let n = prod.wrapping_sub(cons) as usize;
        let mask = self.config.mask();
        let size = self.config.ring_size();
        let mut buf = vec![0u8; n];
        let rsp = unsafe { &*self.rsp.get() };
        copy_wrapping(rsp, (cons & mask) as usize, &mut buf, n, size);
        self.rsp_cons.store(prod, Ordering::Release);

        let req_prod = self.req_prod.load(Ordering::Relaxed);
        let req = unsafe { &mut *self.req.get() };
        write_wrapping(req, (req_prod & mask) as usize, &buf, size);
        self.req_prod.store(req_prod.wrapping_add(n as u32), Ordering::Release);
    }
}

/// Copies `n` bytes starting at `src_off` (mod `size`) in `src` into `dst`,
/// splitting into two `copy_from_slice` calls if the region wraps.
fn copy_wrapping(src: &[u8], src_off: usize, dst: &mut [u8], n: usize, size: usize) {
    let first = n.min(size - src_off);
    dst[..first].copy_from_slice(&src[src_off..src_off + first]);
    if first < n {
        let rest = n - first;
        dst[first..n].copy_from_slice(&src[..rest]);
    }
}

/// Copies `src` into `dst` starting at `dst_off` (mod `size`), splitting into
/// two `copy_from_slice` calls if the region wraps.
fn write_wrapping(dst: &mut [u8], dst_off: usize, src: &[u8], size: usize) {
    let n = src.len();
    let first = n.min(size - dst_off);
    dst[dst_off..dst_off + first].copy_from_slice(&src[..first]);
    if first < n {
        let rest = n - first;
        dst[..rest].copy_from_slice(&src[first..n]);
    }
}

use crate::invariants::debug_assert_watch_fifo;
use std::collections::VecDeque;
use std::sync::Mutex;

/// A domain identifier (Xen's `domid`).
pub type DomId = u16;

/// A subscription to changes at or beneath `prefix_key`.
///
/// Uniquely identified by `(prefix_key, token)` across the whole registry —
/// not by `(prefix_key, token, owner)`. Re-registering an already-present
/// `(prefix_key, token)` pair from a *different* domain still only updates
/// `relative`; ownership stays with whichever domain registered first. This
/// matches the source behavior the registration rule is pinned to.
#[derive(Debug, Clone)]
struct WatchEntry {
    prefix_key: String,
    token: Vec<u8>,
    owner: DomId,
    relative: bool,
}

#[derive(Debug, Clone)]
struct PendingEvent {
    path: String,
    target_domain: DomId,
    seq: u64,
}

/// Looked up on use to wake a target domain's worker; never stored inside
/// a watch entry or pending event, so the registry never holds a reference
/// into a domain context's lifetime.
pub trait DomainDirectory {
    fn wake(&self, domid: DomId);
}

/// The global watch list and pending-event queue.
///
/// The two mutexes are acquired in a fixed order — watch list before
/// pending queue — whenever both are needed together, matching the nesting
/// order observed elsewhere in this system's lock discipline.
pub struct WatchRegistry {
    entries: Mutex<Vec<WatchEntry>>,
    pending: Mutex<VecDeque<PendingEvent>>,
    next_seq: Mutex<u64>,
}

impl Default for WatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            pending: Mutex::new(VecDeque::new()),
            next_seq: Mutex::new(0),
        }
    }

    /// Registers or refreshes a watch. Returns `true` if a new entry was
    /// allocated, `false` if an existing `(prefix_key, token)` entry had its
    /// `relative` flag refreshed.
    pub fn register(&self, prefix_key: String, token: Vec<u8>, owner: DomId, relative: bool) -> bool {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.iter_mut().find(|e| e.prefix_key == prefix_key && e.token == token) {
            entry.relative = relative;
            false
        } else {
            entries.push(WatchEntry { prefix_key, token, owner, relative });
            true
        }
    }

    /// Removes the `(prefix_key, token)` watch owned by `caller`. Returns
    /// whether an entry was removed.
    pub fn unregister(&self, prefix_key: &str, token: &[u8], caller: DomId) -> bool {
        let mut entries = self.entries.lock().unwrap();
        match entries
            .iter()
            .position(|e| e.prefix_key == prefix_key && e.token == token && e.owner == caller)
        {
            Some(idx) => {
                entries.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Drops every watch and pending event globally (`RESET_WATCHES`).
    ///
    /// This is deliberately global, not scoped to the calling domain — the
    /// wire protocol this mirrors has no per-caller scoping for this
    /// operation either.
    pub fn reset_all(&self) {
        self.entries.lock().unwrap().clear();
        self.pending.lock().unwrap().clear();
    }

    /// Called after a tree mutation at absolute path `path` by
    /// `mutating_domain`. Enqueues one pending event per matching watch
    /// entry not owned by the mutating domain, and wakes each such entry's
    /// owner.
    ///
    /// A domain holding several watches that all match `path` gets several
    /// pending events for the same mutation — this mirrors the matching
    /// algorithm exactly rather than collapsing them, since `drain_for`
    /// re-matches against all of a domain's watches per dequeued event
    /// anyway.
    pub fn fire(&self, path: &str, mutating_domain: DomId, directory: &dyn DomainDirectory) {
        let mut woken = Vec::new();
        {
            let entries = self.entries.lock().unwrap();
            let mut pending = self.pending.lock().unwrap();
            let mut next_seq = self.next_seq.lock().unwrap();
            for entry in entries.iter() {
                if entry.owner != mutating_domain && is_prefix(&entry.prefix_key, path) {
                    let seq = *next_seq;
                    *next_seq += 1;
                    pending.push_back(PendingEvent {
                        path: path.to_string(),
                        target_domain: entry.owner,
                        seq,
                    });
                    woken.push(entry.owner);
                }
            }
        }
        for domid in woken {
            directory.wake(domid);
        }
    }

    /// Drains every pending event targeting `domid`, returning one
    /// `(reported_path, token)` pair per matching owned watch. `prefix_key`
    /// matching is byte-prefix, same as `fire`.
    pub fn drain_for(&self, domid: DomId) -> Vec<(String, Vec<u8>)> {
        let events: Vec<PendingEvent> = {
            let mut pending = self.pending.lock().unwrap();
            let mut mine = Vec::new();
            let mut last_seq = None;
            pending.retain(|event| {
                if event.target_domain == domid {
                    if let Some(last) = last_seq {
                        debug_assert_watch_fifo!(domid, last, event.seq);
                    }
                    last_seq = Some(event.seq);
                    mine.push(event.clone());
                    false
                } else {
                    true
                }
            });
            mine
        };

        let entries = self.entries.lock().unwrap();
        let mut out = Vec::new();
        for event in &events {
            for entry in entries.iter() {
                if entry.owner == domid && is_prefix(&entry.prefix_key, &event.path) {
                    let reported = if entry.relative {
                        strip_domain_prefix(&event.path, domid)
                    } else {
                        event.path.clone()
                    };
                    out.push((reported, entry.token.clone()));
                }
            }
        }
        out
    }

    /// Enqueues a single synthetic event targeting `domid`, bypassing the
    /// prefix match and the mutating-domain exclusion `fire` applies.
    ///
    /// Used when a watch is registered against a path that already exists:
    /// the caller gets one immediate event for its own new watch, which
    /// `fire` could never produce since it always excludes the domain that
    /// triggered it.
    pub fn enqueue_for(&self, path: String, domid: DomId, directory: &dyn DomainDirectory) {
        {
            let mut pending = self.pending.lock().unwrap();
            let mut next_seq = self.next_seq.lock().unwrap();
            let seq = *next_seq;
            *next_seq += 1;
            pending.push_back(PendingEvent { path, target_domain: domid, seq });
        }
        directory.wake(domid);
    }

    /// Removes every watch owned by `domid` and every pending event
    /// targeting it, called when the domain's worker stops.
    pub fn purge_domain(&self, domid: DomId) {
        self.entries.lock().unwrap().retain(|e| e.owner != domid);
        self.pending.lock().unwrap().retain(|e| e.target_domain != domid);
    }
}

fn is_prefix(prefix: &str, path: &str) -> bool {
    path.as_bytes().starts_with(prefix.as_bytes())
}

fn strip_domain_prefix(path: &str, domid: DomId) -> String {
    let prefix = format!("/local/domain/{domid}/");
    path.strip_prefix(&prefix).map(str::to_string).unwrap_or_else(|| path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct RecordingDirectory {
        woken: StdMutex<Vec<DomId>>,
    }

    impl RecordingDirectory {
        fn new() -> Self {
            Self { woken: StdMutex::new(Vec::new()) }
        }
    }

    impl DomainDirectory for RecordingDirectory {
        fn wake(&self, domid: DomId) {
            self.woken.lock().unwrap().push(domid);
        }
    }

    #[test]
    fn register_is_idempotent_and_refreshes_relative_only() {
        let reg = WatchRegistry::new();
        assert!(reg.register("/k".into(), b"tok".to_vec(), 1, false));
        assert!(!reg.register("/k".into(), b"tok".to_vec(), 1, true));
    }

    #[test]
    fn unregister_requires_matching_owner() {
        let reg = WatchRegistry::new();
        reg.register("/k".into(), b"tok".to_vec(), 1, false);
        assert!(!reg.unregister("/k", b"tok", 2));
        assert!(reg.unregister("/k", b"tok", 1));
    }

    #[test]
    fn fire_skips_mutating_domain_and_wakes_other_owners() {
        let reg = WatchRegistry::new();
        reg.register("/a".into(), b"t1".to_vec(), 1, false);
        reg.register("/a".into(), b"t2".to_vec(), 2, false);
        let directory = RecordingDirectory::new();

        reg.fire("/a/b", 1, &directory);

        assert_eq!(directory.woken.lock().unwrap().as_slice(), &[2]);
        let events = reg.drain_for(2);
        assert_eq!(events, vec![("/a/b".to_string(), b"t2".to_vec())]);
        assert!(reg.drain_for(1).is_empty());
    }

    #[test]
    fn relative_watch_reports_stripped_path() {
        let reg = WatchRegistry::new();
        reg.register("/local/domain/7/sub".into(), b"t".to_vec(), 7, true);
        let directory = RecordingDirectory::new();

        reg.fire("/local/domain/7/sub", 0, &directory);

        let events = reg.drain_for(7);
        assert_eq!(events, vec![("sub".to_string(), b"t".to_vec())]);
    }

    #[test]
    fn multiple_matching_watches_produce_multiple_events() {
        let reg = WatchRegistry::new();
        reg.register("/r".into(), b"t1".to_vec(), 3, false);
        reg.register("/r/b".into(), b"t2".to_vec(), 3, false);
        let directory = RecordingDirectory::new();

        reg.fire("/r/b/c", 9, &directory);

        let mut events = reg.drain_for(3);
        events.sort();
        let mut expected = vec![("/r/b/c".to_string(), b"t1".to_vec()), ("/r/b/c".to_string(), b"t2".to_vec())];
        expected.sort();
        assert_eq!(events, expected);
    }

    #[test]
    fn reset_all_drops_every_watch_and_pending_event() {
        let reg = WatchRegistry::new();
        reg.register("/a".into(), b"t".to_vec(), 1, false);
        let directory = RecordingDirectory::new();
        reg.fire("/a/b", 2, &directory);

        reg.reset_all();

        assert!(reg.drain_for(1).is_empty());
        let directory = RecordingDirectory::new();
        reg.fire("/a/b", 2, &directory);
        assert!(directory.woken.lock().unwrap().is_empty());
    }

    #[test]
    fn purge_domain_removes_its_watches_and_pending_events() {
        let reg = WatchRegistry::new();
        reg.register("/a".into(), b"t".to_vec(), 1, false);
        let directory = RecordingDirectory::new();
        reg.fire("/a/b", 2, &directory);

        reg.purge_domain(1);

        assert!(reg.drain_for(1).is_empty());
    }
}

//! Debug assertion macros for watch/pending-event bookkeeping.

// =============================================================================
// INV-WATCH-01: Per-Domain FIFO
// =============================================================================

/// Assert that a domain's pending events are observed in non-decreasing
/// enqueue-sequence order, mirroring the per-producer FIFO guarantee a ring
/// consumer checks on its own side.
macro_rules! debug_assert_watch_fifo {
    ($domid:expr, $old_seq:expr, $new_seq:expr) => {
        debug_assert!(
            $new_seq >= $old_seq,
            "INV-WATCH-01 violated: domain {} pending events out of order: {} -> {}",
            $domid,
            $old_seq,
            $new_seq
        )
    };
}

pub(crate) use debug_assert_watch_fifo;

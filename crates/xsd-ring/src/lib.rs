//! Shared-memory split ring transport and wire message framer for a
//! per-domain XenStore connection.
//!
//! This crate owns the lowest layer of the stack: a lock-free byte ring
//! shared between a guest domain and the store, and the framing on top of it
//! that turns ring bytes into discrete request/reply messages. It knows
//! nothing about paths, watches, or transactions.

mod backoff;
mod config;
mod invariants;
mod message;
mod ring;

pub use backoff::Backoff;
pub use config::{Config, SMALL_RING_CONFIG, STANDARD_RING_CONFIG};
pub use message::{max_payload_len, read_message, write_message, FrameError, Header, Message, HEADER_LEN};
pub use ring::{EventChannel, RingPage, CONNECTION_CONNECTED, SERVER_FEATURE_RECONNECTION};

//! Watch subscription registry and pending-event fan-out.
//!
//! Knows nothing about the wire protocol or the tree; `xsd-engine` calls
//! [`WatchRegistry::fire`] after a tree mutation and [`WatchRegistry::drain_for`]
//! at the top of a domain's worker loop.

mod invariants;
mod registry;

pub use registry::{DomId, DomainDirectory, WatchRegistry};

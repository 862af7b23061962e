//! In-process simulation harness standing in for the collaborators a real
//! hypervisor would otherwise provide: event-channel bind/notify and
//! foreign-page mapping. Lets the engine be driven end-to-end from ordinary
//! Rust tests and the `demo` binary without a real hypervisor underneath,
//! the same role test-double exporters and a narrated demo binary play
//! elsewhere in this workspace.

mod guest;

pub use guest::SimGuest;

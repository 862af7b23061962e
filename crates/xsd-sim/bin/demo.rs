//! # XenStore Core Demo
//!
//! A narrated walkthrough of the core end to end, entirely in-process:
//! two simulated domains talk to the engine over their own shared-memory
//! rings, with no real hypervisor underneath (event-channel notify and
//! foreign-page mapping are stubbed by `xsd-sim`'s `SimGuest`).
//!
//! ## What this demonstrates
//!
//! 1. Plain write/read round trip
//! 2. Directory listing and intermediate node autocreation
//! 3. Cross-domain watch fan-out, and the same-domain exclusion
//! 4. A relative watch, reported with its domain prefix stripped
//! 5. Transaction start/busy/end
//! 6. Recursive remove notifying a watcher on a parent path
//!
//! ## Running
//!
//! ```bash
//! cargo run --bin demo -p xsd-sim
//! ```

use xsd_engine::{Opcode, XenstoreEngine, STANDARD_ENGINE_CONFIG};
use xsd_ring::STANDARD_RING_CONFIG;
use xsd_sim::SimGuest;

fn main() {
    println!("=== XenStore core demo ===\n");

    let engine = XenstoreEngine::new(STANDARD_ENGINE_CONFIG);

    println!("-- connecting two domains --");
    let dom1 = SimGuest::connect(&engine, 1, STANDARD_RING_CONFIG).expect("domain 1 should start");
    let dom2 = SimGuest::connect(&engine, 2, STANDARD_RING_CONFIG).expect("domain 2 should start");
    println!("domain 1 and domain 2 connected, each with its own ring page\n");

    println!("-- write then read --");
    let reply = dom1.request(Opcode::Write, b"/foo\0bar");
    println!("WRITE /foo=bar -> {:?}", String::from_utf8_lossy(&reply.payload));
    let reply = dom1.request(Opcode::Read, b"/foo\0");
    println!("READ /foo -> {:?}\n", String::from_utf8_lossy(&reply.payload));

    println!("-- directory listing with autocreated intermediates --");
    dom1.request(Opcode::Write, b"/a/x\0v1");
    dom1.request(Opcode::Write, b"/a/y\0v2");
    let reply = dom1.request(Opcode::Directory, b"/a\0");
    let names: Vec<&str> = reply.payload.split(|&b| b == 0).filter(|s| !s.is_empty()).map(|s| std::str::from_utf8(s).unwrap()).collect();
    println!("DIRECTORY /a -> {names:?}\n");

    println!("-- cross-domain watch --");
    dom2.request(Opcode::Watch, b"/k\0tok");
    println!("domain 2 watches /k (token=tok); path does not exist yet, no synthetic event");
    dom1.request(Opcode::Write, b"/k\0hello");
    println!("domain 1 writes /k=hello");
    let event = dom2.recv_blocking();
    println!(
        "domain 2 receives WATCH_EVENT payload={:?} (domain 1 never sees its own write)\n",
        String::from_utf8_lossy(&event.payload)
    );

    println!("-- relative watch --");
    let dom7 = SimGuest::connect(&engine, 7, STANDARD_RING_CONFIG).expect("domain 7 should start");
    dom7.request(Opcode::Watch, b"sub\0t");
    println!("domain 7 watches relative path \"sub\" -> normalized to /local/domain/7/sub");
    dom7.request(Opcode::Write, b"sub\0v");
    println!("domain 7 writes its own \"sub\" -> no event (same-domain write is filtered)");
    engine.write("/local/domain/7/sub", b"v2").expect("write should succeed");
    let event = dom7.recv_blocking();
    println!(
        "external write to the same absolute path -> WATCH_EVENT payload={:?} (prefix stripped)\n",
        String::from_utf8_lossy(&event.payload)
    );

    println!("-- transaction lifecycle --");
    let reply = dom1.request(Opcode::TransactionStart, b"");
    println!("TRANSACTION_START -> id={:?}", String::from_utf8_lossy(&reply.payload));
    let reply = dom1.request(Opcode::TransactionStart, b"");
    println!("second TRANSACTION_START while active -> {:?}", String::from_utf8_lossy(&reply.payload));
    dom1.request(Opcode::TransactionEnd, b"");
    println!("TRANSACTION_END -> cleared, next START will succeed\n");

    println!("-- recursive remove --");
    dom1.request(Opcode::Write, b"/r/a\01");
    dom1.request(Opcode::Write, b"/r/b/c\02");
    dom1.request(Opcode::Write, b"/r/b/d\03");
    dom2.request(Opcode::Watch, b"/r\0watcher");
    dom1.request(Opcode::Rm, b"/r\0");
    println!("RM /r removed the whole subtree");
    let event = dom2.recv_blocking();
    println!(
        "domain 2's watch on /r fires once for the removal: payload={:?}\n",
        String::from_utf8_lossy(&event.payload)
    );

    println!("-- shutdown --");
    engine.stop_domain(1).unwrap();
    engine.stop_domain(2).unwrap();
    engine.stop_domain(7).unwrap();
    println!("all domains stopped; their watches and pending events were purged on the way out");
}

//! Request dispatch, per-domain worker lifecycle, and the orchestration
//! facade tying the ring, tree, and watch layers together into a running
//! XenStore core.

mod config;
mod dispatch;
mod engine;
mod error;
mod pool;
mod proto;
mod worker;

pub use config::{Config, SMALL_ENGINE_CONFIG, STANDARD_ENGINE_CONFIG};
pub use dispatch::dispatch;
pub use engine::XenstoreEngine;
pub use error::EngineError;
pub use pool::WorkerPool;
pub use proto::{Opcode, XsdError};
pub use worker::{run_worker_loop, DomainContext, WakeSemaphore, WorkerState};

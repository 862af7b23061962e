use thiserror::Error;

/// Errors from engine-level orchestration (domain lifecycle, pool
/// management) — distinct from [`crate::proto::XsdError`], which is the
/// per-request wire error taxonomy.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    #[error("worker pool has no free slots")]
    PoolFull,
    #[error("domain is already running")]
    AlreadyRunning,
    #[error("domain is not running")]
    NotRunning,
    #[error("failed to spawn the domain's worker thread")]
    SpawnFailed,
}

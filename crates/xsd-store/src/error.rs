use thiserror::Error;

/// Errors produced by path construction and tree mutation.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// Constructed absolute path (including its trailing null) exceeds
    /// [`crate::config::ABS_PATH_MAX`].
    #[error("path exceeds maximum length")]
    PathTooLong,
    /// A node allocation failed partway through a write; the walk was
    /// unwound and no partial subtree was left behind.
    #[error("allocation failed while creating an intermediate node")]
    AllocFailed,
}

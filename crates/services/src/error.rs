//! Shared error types for the services crate.

use thiserror::Error;

use storage::repository::StorageError;

/// Errors emitted by `ProgressService`.
///
/// Unparsable records and records owned by another profile are not errors; they
/// read as absent.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors emitted by `MigrationService`.
///
/// Only a failure to enumerate the store aborts a pass; per-key failures are
/// counted in the report instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MigrationError {
    #[error("failed to enumerate store keys: {0}")]
    Enumerate(#[from] StorageError),
}

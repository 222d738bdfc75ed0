//! Typed failure taxonomy for the store family.
//!
//! Store operations report failure through their return values (a
//! success boolean or an empty result set), never by raising to the
//! caller. These variants classify what went wrong for logging and
//! diagnostics; the only one a caller ever sees propagated is
//! [`StoreError::StorageUnavailable`] at construction time.

use thiserror::Error;

/// What went wrong inside a store operation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No backend is configured, or constructing one failed.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// I/O or remote-call failure mid-write. The local backend rolls its
    /// in-memory state back to the pre-call snapshot when this occurs.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    /// The local write succeeded but the mirror write failed. Surfaced
    /// only via the retry queue, never raised.
    #[error("consistency drift for record {record_id} ({source_file}): {reason}")]
    ConsistencyDrift {
        record_id: String,
        source_file: String,
        reason: String,
    },

    /// Malformed query vector or unreachable search backend.
    #[error("search failure: {0}")]
    SearchFailure(String),
}

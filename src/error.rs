//! Error taxonomy for the mapper.
//!
//! Driver failures arrive as [`DriverError`] and are wrapped transparently. Everything the
//! mapper itself decides (validation, conflicts, missing documents) gets its own variant so
//! callers can tell "someone else won the race" apart from a genuine fault.

use crate::document::driver::DriverError;

#[derive(Debug, thiserror::Error)]
pub enum OdmError {
    /// Usage errors: undeclared attribute, type mismatch, malformed index, missing identity.
    #[error("validation error: {0}")]
    Validation(String),

    /// Insert collided with an existing document and `force` was not requested.
    #[error("duplicate identity in {collection}: {detail}")]
    DuplicateKey { collection: String, detail: String },

    /// The optimistic-concurrency retry loop ran out of attempts.
    #[error("could not commit to {model} after {attempts} attempts")]
    CommitConflict { model: String, attempts: u32 },

    /// The document's identity no longer resolves on its primary shard.
    #[error("document {identity} no longer exists in {model}")]
    DocumentMissing { model: String, identity: String },

    #[error("timed out acquiring lock '{name}'")]
    LockTimeout { name: String },

    #[error("unbounded scan on {model} aborted after {scanned} documents")]
    ScanAborted { model: String, scanned: usize },

    #[error("{event} hook failed: {source}")]
    Hook {
        event: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl OdmError {
    /// Transient driver errors are retried as a whole transaction.
    pub fn is_transient(&self) -> bool {
        matches!(self, OdmError::Driver(e) if e.is_transient())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        OdmError::Validation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, OdmError>;

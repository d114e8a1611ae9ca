use crate::common::Handle;
use thiserror::Error;

/// Error type for map and store operations.
#[derive(Error, Debug)]
pub enum MapError {
    #[error("object not found in store for handle: {0:?}")]
    ObjectNotFound(Handle),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The store detected a conflicting update and aborted the transaction.
    /// Callers retry the whole operation in a fresh transaction.
    #[error("transaction aborted: {0}")]
    TransactionConflict(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("storage operation failed: {0}")]
    Storage(String),

    #[error("bincode serialization/deserialization error: {source}")]
    Codec {
        #[from]
        source: bincode::Error,
    },

    /// A structural invariant did not hold; indicates corruption rather than
    /// a runtime condition.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for map operations.
pub type Result<T> = std::result::Result<T, MapError>;

//! Error types for the core crate.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors from local collection state.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A payload could not be encoded or decoded.
    #[error("payload codec error: {0}")]
    Payload(#[from] citesync_protocol::WireError),

    /// A local key does not exist in the library.
    #[error("unknown local key: {0}")]
    UnknownKey(u64),

    /// An item ID is not present in the library.
    #[error("unknown item: {0}")]
    UnknownItem(citesync_protocol::ItemId),

    /// A checkpoint could not be read or written.
    #[error("checkpoint store error: {0}")]
    Checkpoint(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

//! Error types for the sync engine.

use citesync_protocol::ItemId;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during a sync session.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Protocol error (invalid message format).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server rejected the request outright.
    #[error("server error: {0}")]
    ServerError(String),

    /// Wire codec error.
    #[error(transparent)]
    Wire(#[from] citesync_protocol::WireError),

    /// Local collection state error.
    #[error(transparent)]
    Core(#[from] citesync_core::CoreError),

    /// The server reported an older revision than the client holds.
    ///
    /// This never occurs under correct server behavior. It is a
    /// non-retryable data-consistency fault requiring manual
    /// intervention, such as a full resync; it is never silently
    /// repaired.
    #[error(
        "revision regression for {id}: server at {server_revision}, client at {local_revision}"
    )]
    RevisionRegression {
        /// The affected item.
        id: ItemId,
        /// The revision the server sent.
        server_revision: u64,
        /// The revision the client holds.
        local_revision: u64,
    },

    /// The session was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Not connected to the server.
    #[error("not connected to server")]
    NotConnected,

    /// The event subscription channel closed unexpectedly.
    #[error("event subscription lost")]
    SubscriptionLost,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the failed phase can be retried.
    ///
    /// Retrying is safe because pulls are idempotent for an unchanged
    /// checkpoint and pushes are compare-and-swap guarded.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::ServerError(_) => true,
            SyncError::SubscriptionLost => true,
            _ => false,
        }
    }

    /// Returns true if this error indicates a consistency fault that
    /// must not be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::RevisionRegression { .. })
    }
}

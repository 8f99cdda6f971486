//! Server-side error types.

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors returned by the request handlers.
///
/// Per-item push rejections are not errors; they travel inside a
/// successful [`citesync_protocol::PushResponse`]. An error here means
/// the request as a whole could not be processed.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The request body could not be decoded or re-encoded.
    #[error(transparent)]
    Wire(#[from] citesync_protocol::WireError),

    /// The request was structurally invalid.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ServerError {
    /// Returns true if the fault lies with the client's request.
    ///
    /// Byte-level handlers map this to a 4xx status; everything else is
    /// a 5xx.
    pub fn is_client_fault(&self) -> bool {
        match self {
            ServerError::Wire(err) => err.is_decode(),
            ServerError::InvalidRequest(_) => true,
        }
    }
}

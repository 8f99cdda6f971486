//! CBOR encoding and decoding for protocol messages.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Result type for wire codec operations.
pub type WireResult<T> = Result<T, WireError>;

/// Errors from encoding or decoding protocol messages.
#[derive(Error, Debug)]
pub enum WireError {
    /// Failed to encode a message to CBOR.
    #[error("encode error: {0}")]
    Encode(String),

    /// Failed to decode a message from CBOR.
    #[error("decode error: {0}")]
    Decode(String),
}

impl WireError {
    /// Returns true for decode failures, which indicate a malformed
    /// input rather than a local fault.
    #[must_use]
    pub fn is_decode(&self) -> bool {
        matches!(self, WireError::Decode(_))
    }
}

/// Encodes a message to CBOR bytes.
pub fn to_cbor<T: Serialize>(value: &T) -> WireResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| WireError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Decodes a message from CBOR bytes.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> WireResult<T> {
    ciborium::from_reader(bytes).map_err(|e| WireError::Decode(e.to_string()))
}

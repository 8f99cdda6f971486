//! # CiteSync Protocol
//!
//! Wire types and CBOR codecs for the CiteSync replication protocol.
//!
//! This crate provides:
//! - `ItemId` for stable item identity
//! - `Checkpoint` resumption tokens
//! - `ChangeRecord` for the server change stream
//! - Pull and push request/response messages
//! - `ChangeNotification` for the event subscription channel
//! - CBOR encoding/decoding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod checkpoint;
mod codec;
mod id;
mod messages;
mod notify;

pub use change::{ChangeRecord, Tombstone};
pub use checkpoint::Checkpoint;
pub use codec::{from_cbor, to_cbor, WireError, WireResult};
pub use id::ItemId;
pub use messages::{
    AcceptedChange, ItemUpdate, PullRequest, PullResponse, PushRequest, PushResponse,
    RejectedChange, TombstoneUpdate,
};
pub use notify::ChangeNotification;

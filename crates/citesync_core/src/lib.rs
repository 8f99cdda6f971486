//! # CiteSync Core
//!
//! Local collection state for CiteSync.
//!
//! This crate provides:
//! - `Record`, the opaque bibliographic payload
//! - Content hashing for out-of-band modification detection
//! - `SyncMeta`, the per-item sync attributes (id, revision, hash, dirty)
//! - `TombstoneLog` for pending deletion propagation
//! - `CheckpointStore` implementations (durable file-backed and in-memory)
//! - `Library`, the in-memory collection with dirty tracking
//!
//! ## Key Invariants
//!
//! - An item's dirty flag is derived state: it is recomputed at load time
//!   and never serialized
//! - Sync metadata is only mutated through the owning sync session
//! - Checkpoint writes are atomic (write-then-rename)

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checkpoint;
mod error;
mod hash;
mod library;
mod meta;
mod record;
mod tombstone;

pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use error::{CoreError, CoreResult};
pub use hash::{hash_record, ContentHash};
pub use library::{Library, LibraryEntry, LocalKey};
pub use meta::SyncMeta;
pub use record::Record;
pub use tombstone::TombstoneLog;

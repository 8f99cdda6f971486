//! Server change stream records and deletion markers.

use crate::checkpoint::Checkpoint;
use crate::id::ItemId;
use serde::{Deserialize, Serialize};

/// A deletion marker.
///
/// Tombstones carry only the item's identity and its revision at the time
/// of deletion. They are retained long enough for every client to observe
/// and apply the deletion, then discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    /// The deleted item.
    pub id: ItemId,
    /// The item's revision when it was deleted.
    pub revision: u64,
}

impl Tombstone {
    /// Creates a tombstone for an item at the given revision.
    #[must_use]
    pub const fn new(id: ItemId, revision: u64) -> Self {
        Self { id, revision }
    }
}

/// One entry of the server change stream.
///
/// A change record is either the current content of an item (`payload`
/// present) or a tombstone (`tombstone` true, no payload). Each record
/// carries its position in the stream, which doubles as the checkpoint a
/// client reaches after merging it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// The affected item.
    pub id: ItemId,
    /// The item's revision after this change.
    pub revision: u64,
    /// Whether this change deletes the item.
    pub tombstone: bool,
    /// The item content after this change. `None` for tombstones.
    pub payload: Option<Vec<u8>>,
    /// Position of this change in the stream.
    pub position: Checkpoint,
}

impl ChangeRecord {
    /// Creates a content change record.
    #[must_use]
    pub fn put(id: ItemId, revision: u64, payload: Vec<u8>, position: Checkpoint) -> Self {
        Self {
            id,
            revision,
            tombstone: false,
            payload: Some(payload),
            position,
        }
    }

    /// Creates a tombstone change record.
    #[must_use]
    pub fn tombstone(id: ItemId, revision: u64, position: Checkpoint) -> Self {
        Self {
            id,
            revision,
            tombstone: true,
            payload: None,
            position,
        }
    }

    /// Returns the size of the payload in bytes.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.payload.as_ref().map(|p| p.len()).unwrap_or(0)
    }
}

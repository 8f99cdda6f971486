//! Per-item sync attributes.

use crate::hash::ContentHash;
use citesync_protocol::ItemId;
use serde::{Deserialize, Serialize};

/// Sync attributes attached 1:1 to every synchronized item.
///
/// `dirty` is a derived fact, not source-of-truth state: it is skipped
/// during serialization and recomputed at load time by comparing the
/// stored hash against a fresh hash of the content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMeta {
    /// Server-assigned identity; `None` until the first successful push.
    pub id: Option<ItemId>,
    /// Per-item logical clock, advanced exclusively by the server;
    /// `None` until the first successful push.
    pub revision: Option<u64>,
    /// Digest of the content at the last successful sync of this item.
    pub hash: Option<ContentHash>,
    /// True if the item has been locally modified since its last sync.
    #[serde(skip)]
    pub dirty: bool,
}

impl SyncMeta {
    /// Metadata for a freshly created, never-synced item.
    #[must_use]
    pub fn new_local() -> Self {
        Self {
            id: None,
            revision: None,
            hash: None,
            dirty: true,
        }
    }

    /// Metadata for an item adopted from the server.
    #[must_use]
    pub fn synced(id: ItemId, revision: u64, hash: ContentHash) -> Self {
        Self {
            id: Some(id),
            revision: Some(revision),
            hash: Some(hash),
            dirty: false,
        }
    }

    /// Returns true if the server has assigned this item an identity.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.id.is_some()
    }

    /// Records a local edit.
    pub fn mark_edited(&mut self) {
        self.dirty = true;
    }

    /// Records a server acknowledgment at the given revision.
    pub fn mark_synced(&mut self, revision: u64, hash: ContentHash) {
        self.revision = Some(revision);
        self.hash = Some(hash);
        self.dirty = false;
    }

    /// Recomputes the dirty flag from the current content hash.
    ///
    /// An absent stored hash counts as dirty: the item has never been
    /// synced.
    pub fn recompute_dirty(&mut self, current: ContentHash) {
        self.dirty = self.hash != Some(current);
    }
}

//! Pending-deletion bookkeeping.

use citesync_protocol::{ItemId, Tombstone};
use serde::{Deserialize, Serialize};

/// The authoritative list of local deletions pending propagation.
///
/// A tombstone is recorded when a synced item is deleted locally, offered
/// to the server during push, and removed once the server acknowledges
/// it. A tombstone is also discarded without a push when the server's own
/// tombstone for the item arrives first, or when a conflict resolution
/// resurrects the item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TombstoneLog {
    entries: Vec<Tombstone>,
}

impl TombstoneLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a deletion pending propagation.
    ///
    /// Recording the same item again replaces the earlier entry.
    pub fn record(&mut self, tombstone: Tombstone) {
        self.entries.retain(|t| t.id != tombstone.id);
        self.entries.push(tombstone);
    }

    /// Returns the pending tombstones in recording order.
    #[must_use]
    pub fn pending(&self) -> &[Tombstone] {
        &self.entries
    }

    /// Returns the pending tombstone for an item, if any.
    #[must_use]
    pub fn get(&self, id: &ItemId) -> Option<&Tombstone> {
        self.entries.iter().find(|t| t.id == *id)
    }

    /// Returns true if a deletion of the item is pending.
    #[must_use]
    pub fn contains(&self, id: &ItemId) -> bool {
        self.get(id).is_some()
    }

    /// Removes the entry for an acknowledged or superseded deletion.
    ///
    /// Returns true if an entry was removed.
    pub fn discard(&mut self, id: &ItemId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|t| t.id != *id);
        self.entries.len() != before
    }

    /// Rebases a pending tombstone onto a newer server revision.
    ///
    /// Used when a delete-versus-edit conflict resolves to keeping the
    /// local deletion: the next push must compare-and-swap against the
    /// server's current revision.
    pub fn rebase(&mut self, id: &ItemId, revision: u64) -> bool {
        if let Some(entry) = self.entries.iter_mut().find(|t| t.id == *id) {
            entry.revision = revision;
            true
        } else {
            false
        }
    }

    /// Returns the number of pending tombstones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no deletions are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! The in-memory collection of synchronized records.

use crate::error::{CoreError, CoreResult};
use crate::hash::hash_record;
use crate::meta::SyncMeta;
use crate::record::Record;
use crate::tombstone::TombstoneLog;
use citesync_protocol::{ItemId, Tombstone};
use std::collections::{BTreeMap, HashMap};

/// Collection-local handle for an item.
///
/// Local keys identify items before the server has assigned them an
/// `ItemId`, and stay valid for the item's lifetime in this collection.
/// They carry no meaning outside the owning `Library`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalKey(u64);

impl LocalKey {
    /// Reconstructs a key from its raw value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for LocalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One item of the collection: its record and sync attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryEntry {
    /// The sync attributes.
    pub meta: SyncMeta,
    /// The record content.
    pub record: Record,
}

/// An offline-editable collection of bibliographic records.
///
/// The library owns the sync metadata of every item and the tombstone
/// log. All metadata mutation goes through the methods here, and during a
/// sync session exclusively through the session's store handle, giving
/// single-writer discipline without explicit locking.
#[derive(Debug, Default)]
pub struct Library {
    entries: BTreeMap<LocalKey, LibraryEntry>,
    by_id: HashMap<ItemId, LocalKey>,
    tombstones: TombstoneLog,
    next_key: u64,
}

impl Library {
    /// Creates an empty library.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a freshly created record.
    ///
    /// The item starts dirty with no server identity; the first
    /// successful push assigns its ID and revision.
    pub fn insert(&mut self, record: Record) -> LocalKey {
        let key = self.allocate_key();
        self.entries.insert(
            key,
            LibraryEntry {
                meta: SyncMeta::new_local(),
                record,
            },
        );
        key
    }

    fn allocate_key(&mut self) -> LocalKey {
        self.next_key += 1;
        LocalKey(self.next_key)
    }

    /// Returns an entry by local key.
    #[must_use]
    pub fn get(&self, key: LocalKey) -> Option<&LibraryEntry> {
        self.entries.get(&key)
    }

    /// Returns the local key for a server-assigned ID.
    #[must_use]
    pub fn key_of(&self, id: &ItemId) -> Option<LocalKey> {
        self.by_id.get(id).copied()
    }

    /// Returns an entry by server-assigned ID.
    #[must_use]
    pub fn get_by_id(&self, id: &ItemId) -> Option<&LibraryEntry> {
        self.key_of(id).and_then(|key| self.get(key))
    }

    /// Edits a record in place, marking the item dirty.
    pub fn edit(&mut self, key: LocalKey, apply: impl FnOnce(&mut Record)) -> CoreResult<()> {
        let entry = self
            .entries
            .get_mut(&key)
            .ok_or(CoreError::UnknownKey(key.raw()))?;
        apply(&mut entry.record);
        entry.meta.mark_edited();
        Ok(())
    }

    /// Replaces a record wholesale, marking the item dirty.
    pub fn replace_record(&mut self, key: LocalKey, record: Record) -> CoreResult<()> {
        self.edit(key, |r| *r = record)
    }

    /// Deletes an item locally.
    ///
    /// Synced items leave a tombstone pending propagation; never-synced
    /// items vanish without one, since no other device has seen them.
    pub fn delete(&mut self, key: LocalKey) -> CoreResult<()> {
        let entry = self
            .entries
            .remove(&key)
            .ok_or(CoreError::UnknownKey(key.raw()))?;
        if let (Some(id), Some(revision)) = (entry.meta.id, entry.meta.revision) {
            self.by_id.remove(&id);
            self.tombstones.record(Tombstone::new(id, revision));
        }
        Ok(())
    }

    /// Adopts server content for an item, creating it if unknown.
    ///
    /// Clears the dirty flag, refreshes the stored hash, and discards any
    /// pending local tombstone for the item (the server's version
    /// supersedes a local deletion once a conflict resolves that way).
    pub fn apply_remote(&mut self, id: ItemId, revision: u64, record: Record) -> LocalKey {
        self.tombstones.discard(&id);
        let hash = hash_record(&record);
        match self.key_of(&id) {
            Some(key) => {
                if let Some(entry) = self.entries.get_mut(&key) {
                    entry.record = record;
                    entry.meta.mark_synced(revision, hash);
                }
                key
            }
            None => {
                let key = self.allocate_key();
                self.entries.insert(
                    key,
                    LibraryEntry {
                        meta: SyncMeta::synced(id, revision, hash),
                        record,
                    },
                );
                self.by_id.insert(id, key);
                key
            }
        }
    }

    /// Applies a server-side deletion.
    ///
    /// Removes the item if present and discards any local tombstone for
    /// it (the deletion is already a shared fact).
    pub fn remove_remote(&mut self, id: &ItemId) {
        self.tombstones.discard(id);
        if let Some(key) = self.by_id.remove(id) {
            self.entries.remove(&key);
        }
    }

    /// Rebases an item onto a newer server revision, keeping local state.
    ///
    /// Used when a conflict resolves to the local side: the server's
    /// revision becomes the new compare-and-swap base while the dirty
    /// content (or pending deletion) is re-offered on the next push.
    pub fn adopt_base(&mut self, id: &ItemId, revision: u64) -> CoreResult<()> {
        if let Some(key) = self.key_of(id) {
            if let Some(entry) = self.entries.get_mut(&key) {
                entry.meta.revision = Some(revision);
                return Ok(());
            }
        }
        if self.tombstones.rebase(id, revision) {
            return Ok(());
        }
        Err(CoreError::UnknownItem(*id))
    }

    /// Records server acceptance of a pushed item.
    ///
    /// Assigns the identity for new items, adopts the new revision,
    /// refreshes the stored hash from the current content, and clears the
    /// dirty flag.
    pub fn confirm_update(&mut self, key: LocalKey, id: ItemId, revision: u64) -> CoreResult<()> {
        let entry = self
            .entries
            .get_mut(&key)
            .ok_or(CoreError::UnknownKey(key.raw()))?;
        if entry.meta.id.is_none() {
            entry.meta.id = Some(id);
            self.by_id.insert(id, key);
        }
        let hash = hash_record(&entry.record);
        entry.meta.mark_synced(revision, hash);
        Ok(())
    }

    /// Records server acceptance of a pushed tombstone.
    pub fn confirm_tombstone(&mut self, id: &ItemId) {
        self.tombstones.discard(id);
    }

    /// Recomputes every item's dirty flag from its content.
    ///
    /// Called after loading the collection from disk, catching edits made
    /// while the collection was not under sync management.
    pub fn recompute_dirty(&mut self) {
        for entry in self.entries.values_mut() {
            let hash = hash_record(&entry.record);
            entry.meta.recompute_dirty(hash);
        }
    }

    /// Returns the items pending a push: dirty or never-synced.
    #[must_use]
    pub fn pending_updates(&self) -> Vec<(LocalKey, &LibraryEntry)> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.meta.dirty)
            .map(|(key, entry)| (*key, entry))
            .collect()
    }

    /// Returns the tombstone log.
    #[must_use]
    pub fn tombstones(&self) -> &TombstoneLog {
        &self.tombstones
    }

    /// Returns the number of live items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the collection holds no live items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (LocalKey, &LibraryEntry)> {
        self.entries.iter().map(|(key, entry)| (*key, entry))
    }
}

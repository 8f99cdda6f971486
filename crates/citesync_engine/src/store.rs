//! The engine's view of local item state.
//!
//! The session never touches a `Library` directly; it goes through the
//! [`ItemStore`] trait, which keeps the merge and push logic independent
//! of how the application persists its collection. [`LibraryStore`] is
//! the in-memory implementation over `citesync_core::Library` and also
//! enforces the push-window edit deferral described in
//! [`LibraryStore::submit_edit`].

use crate::error::SyncResult;
use crate::merge::LocalState;
use citesync_core::{Library, LocalKey, Record};
use citesync_protocol::{ItemId, Tombstone};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;

/// A locally modified item awaiting push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdate {
    /// The store-local key, echoed back on confirmation.
    pub key: u64,
    /// The server identity, absent for never-pushed items.
    pub id: Option<ItemId>,
    /// The compare-and-swap base revision, absent for new items.
    pub revision: Option<u64>,
    /// The encoded record content.
    pub payload: Vec<u8>,
}

/// Local item state as the sync session sees it.
///
/// Implementations must be internally synchronized; the session may be
/// driven from a background thread while the application reads the
/// collection.
pub trait ItemStore: Send + Sync {
    /// Returns the merge-relevant state of an item.
    fn local_state(&self, id: &ItemId) -> LocalState;

    /// Adopts server content and revision for an item, clearing any
    /// dirty flag and pending local tombstone.
    fn apply_remote(&self, id: ItemId, revision: u64, payload: &[u8]) -> SyncResult<()>;

    /// Applies a server-side deletion locally.
    fn remove_local(&self, id: &ItemId);

    /// Rebases an item (or its pending tombstone) onto a newer server
    /// revision without touching local content.
    fn adopt_base(&self, id: &ItemId, revision: u64) -> SyncResult<()>;

    /// Returns the item's current encoded content, if it exists.
    fn local_payload(&self, id: &ItemId) -> SyncResult<Option<Vec<u8>>>;

    /// Returns the dirty and never-pushed items awaiting upload.
    fn pending_updates(&self) -> SyncResult<Vec<PendingUpdate>>;

    /// Returns the local deletions awaiting propagation.
    fn pending_tombstones(&self) -> Vec<Tombstone>;

    /// Records server acceptance of a pushed item.
    fn confirm_update(&self, key: u64, id: ItemId, revision: u64) -> SyncResult<()>;

    /// Records server acceptance of a pushed tombstone.
    fn confirm_tombstone(&self, id: &ItemId);

    /// Marks the given items as in flight for the duration of a push.
    fn begin_push(&self, _in_flight: &[ItemId]) {}

    /// Ends the push window opened by `begin_push`.
    fn end_push(&self) {}
}

/// An edit submitted while its item was in flight.
#[derive(Debug)]
struct DeferredEdit {
    id: ItemId,
    record: Record,
}

/// [`ItemStore`] over an in-memory [`Library`].
///
/// Holds the library behind a `RwLock`. During a push window, edits to
/// in-flight items submitted through [`LibraryStore::submit_edit`] are
/// deferred and applied when the window closes, so a server
/// acknowledgement can never clear a dirty flag that a concurrent edit
/// just set.
#[derive(Debug, Default)]
pub struct LibraryStore {
    library: RwLock<Library>,
    in_flight: Mutex<HashSet<ItemId>>,
    deferred: Mutex<Vec<DeferredEdit>>,
}

impl LibraryStore {
    /// Creates a store over an empty library.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing library.
    #[must_use]
    pub fn from_library(library: Library) -> Self {
        Self {
            library: RwLock::new(library),
            in_flight: Mutex::new(HashSet::new()),
            deferred: Mutex::new(Vec::new()),
        }
    }

    /// Runs a closure with shared access to the library.
    pub fn read<R>(&self, f: impl FnOnce(&Library) -> R) -> R {
        f(&self.library.read())
    }

    /// Runs a closure with exclusive access to the library.
    ///
    /// Bypasses the push-window deferral; callers that may race a push
    /// should use [`LibraryStore::submit_edit`] instead.
    pub fn write<R>(&self, f: impl FnOnce(&mut Library) -> R) -> R {
        f(&mut self.library.write())
    }

    /// Replaces an item's record, deferring the edit if the item is
    /// currently being pushed.
    ///
    /// Returns true if the edit was applied immediately, false if it was
    /// queued until the push window closes.
    pub fn submit_edit(&self, id: ItemId, record: Record) -> SyncResult<bool> {
        if self.in_flight.lock().contains(&id) {
            self.deferred.lock().push(DeferredEdit { id, record });
            return Ok(false);
        }
        let mut library = self.library.write();
        if let Some(key) = library.key_of(&id) {
            library.replace_record(key, record)?;
        }
        Ok(true)
    }
}

impl ItemStore for LibraryStore {
    fn local_state(&self, id: &ItemId) -> LocalState {
        let library = self.library.read();
        if let Some(entry) = library.get_by_id(id) {
            return LocalState {
                revision: entry.meta.revision,
                dirty: entry.meta.dirty,
                tombstone: false,
            };
        }
        if let Some(tombstone) = library.tombstones().get(id) {
            return LocalState {
                revision: Some(tombstone.revision),
                dirty: false,
                tombstone: true,
            };
        }
        LocalState::absent()
    }

    fn apply_remote(&self, id: ItemId, revision: u64, payload: &[u8]) -> SyncResult<()> {
        let record = Record::from_payload(payload)?;
        self.library.write().apply_remote(id, revision, record);
        Ok(())
    }

    fn remove_local(&self, id: &ItemId) {
        self.library.write().remove_remote(id);
    }

    fn adopt_base(&self, id: &ItemId, revision: u64) -> SyncResult<()> {
        self.library.write().adopt_base(id, revision)?;
        Ok(())
    }

    fn local_payload(&self, id: &ItemId) -> SyncResult<Option<Vec<u8>>> {
        let library = self.library.read();
        match library.get_by_id(id) {
            Some(entry) => Ok(Some(entry.record.to_payload()?)),
            None => Ok(None),
        }
    }

    fn pending_updates(&self) -> SyncResult<Vec<PendingUpdate>> {
        let library = self.library.read();
        let mut updates = Vec::new();
        for (key, entry) in library.pending_updates() {
            updates.push(PendingUpdate {
                key: key.raw(),
                id: entry.meta.id,
                revision: entry.meta.revision,
                payload: entry.record.to_payload()?,
            });
        }
        Ok(updates)
    }

    fn pending_tombstones(&self) -> Vec<Tombstone> {
        self.library.read().tombstones().pending().to_vec()
    }

    fn confirm_update(&self, key: u64, id: ItemId, revision: u64) -> SyncResult<()> {
        self.library
            .write()
            .confirm_update(LocalKey::from_raw(key), id, revision)?;
        Ok(())
    }

    fn confirm_tombstone(&self, id: &ItemId) {
        self.library.write().confirm_tombstone(id);
    }

    fn begin_push(&self, in_flight: &[ItemId]) {
        let mut guard = self.in_flight.lock();
        guard.clear();
        guard.extend(in_flight.iter().copied());
    }

    fn end_push(&self) {
        self.in_flight.lock().clear();
        let deferred: Vec<DeferredEdit> = std::mem::take(&mut self.deferred.lock());
        if deferred.is_empty() {
            return;
        }
        let mut library = self.library.write();
        for edit in deferred {
            if let Some(key) = library.key_of(&edit.id) {
                // replace_record marks the item dirty, so a deferred
                // edit survives the acknowledgement that just landed.
                let _ = library.replace_record(key, edit.record);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        Record::new("article").with_field("title", "End-to-End Arguments")
    }

    fn synced_store() -> (LibraryStore, ItemId, LocalKey) {
        let store = LibraryStore::new();
        let id = ItemId::new();
        let key = store.write(|library| {
            let key = library.insert(sample());
            library.confirm_update(key, id, 1).unwrap();
            key
        });
        (store, id, key)
    }

    #[test]
    fn local_state_reflects_library() {
        let (store, id, key) = synced_store();
        assert_eq!(
            store.local_state(&id),
            LocalState {
                revision: Some(1),
                dirty: false,
                tombstone: false
            }
        );

        store.write(|library| {
            library
                .edit(key, |r| {
                    r.set_field("year", "1984");
                })
                .unwrap();
        });
        assert!(store.local_state(&id).dirty);

        assert_eq!(store.local_state(&ItemId::new()), LocalState::absent());
    }

    #[test]
    fn local_state_sees_tombstones() {
        let (store, id, key) = synced_store();
        store.write(|library| library.delete(key).unwrap());

        let state = store.local_state(&id);
        assert!(state.tombstone);
        assert_eq!(state.revision, Some(1));
        assert_eq!(store.pending_tombstones(), vec![Tombstone::new(id, 1)]);
    }

    #[test]
    fn apply_remote_roundtrips_payload() {
        let store = LibraryStore::new();
        let id = ItemId::new();
        let remote = sample().with_field("author", "Saltzer");
        let payload = remote.to_payload().unwrap();

        store.apply_remote(id, 3, &payload).unwrap();

        store.read(|library| {
            let entry = library.get_by_id(&id).unwrap();
            assert_eq!(entry.record, remote);
            assert_eq!(entry.meta.revision, Some(3));
            assert!(!entry.meta.dirty);
        });
    }

    #[test]
    fn pending_updates_carry_identity_and_base() {
        let (store, id, key) = synced_store();
        store.write(|library| {
            library
                .edit(key, |r| {
                    r.set_field("year", "1984");
                })
                .unwrap();
            library.insert(sample());
        });

        let mut updates = store.pending_updates().unwrap();
        updates.sort_by_key(|u| u.key);
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].id, Some(id));
        assert_eq!(updates[0].revision, Some(1));
        assert_eq!(updates[1].id, None);
        assert_eq!(updates[1].revision, None);
    }

    #[test]
    fn edits_during_push_are_deferred() {
        let (store, id, _key) = synced_store();

        store.begin_push(&[id]);
        let applied = store
            .submit_edit(id, sample().with_field("note", "late edit"))
            .unwrap();
        assert!(!applied);
        store.read(|library| {
            assert!(!library.get_by_id(&id).unwrap().meta.dirty);
        });

        // Acknowledgement lands while the edit is parked.
        store
            .confirm_update(
                store.read(|l| l.key_of(&id).unwrap().raw()),
                id,
                2,
            )
            .unwrap();

        store.end_push();
        store.read(|library| {
            let entry = library.get_by_id(&id).unwrap();
            assert!(entry.meta.dirty);
            assert_eq!(entry.record.field("note"), Some("late edit"));
        });
    }

    #[test]
    fn edits_outside_push_apply_immediately() {
        let (store, id, _key) = synced_store();
        let applied = store
            .submit_edit(id, sample().with_field("note", "prompt edit"))
            .unwrap();
        assert!(applied);
        store.read(|library| {
            assert!(library.get_by_id(&id).unwrap().meta.dirty);
        });
    }
}

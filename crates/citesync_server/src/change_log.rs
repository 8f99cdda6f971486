//! The authoritative item table and change stream.

use citesync_protocol::{
    AcceptedChange, ChangeRecord, Checkpoint, ItemId, ItemUpdate, RejectedChange, TombstoneUpdate,
};
use std::collections::HashMap;
use tracing::debug;

/// The server's current knowledge of one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemState {
    /// Current revision, advanced on every accepted change.
    pub revision: u64,
    /// True once the item has been deleted.
    pub tombstone: bool,
    /// Current content; `None` for tombstones.
    pub payload: Option<Vec<u8>>,
}

/// Outcome of applying one pushed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// The submission's base revision matched; the change is now part
    /// of the stream.
    Accepted(AcceptedChange),
    /// The submission's base revision was stale.
    Rejected(RejectedChange),
}

/// The item table plus the ordered stream of changes to it.
///
/// Stream positions are a server-local logical clock paired with the
/// item's identity as a tie-breaker, so every change has a unique,
/// totally ordered position. The stream is compacted: a new change to
/// an item supersedes and removes the item's earlier entry, which keeps
/// the stream bounded by the number of items (plus retained
/// tombstones) rather than by history length. A pull from any
/// checkpoint still reaches full convergence, because the latest entry
/// per item is all a client needs.
#[derive(Debug, Default)]
pub struct ChangeLog {
    entries: Vec<ChangeRecord>,
    items: HashMap<ItemId, ItemState>,
    head: Checkpoint,
}

impl ChangeLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_position(&mut self, id: ItemId) -> Checkpoint {
        self.head = Checkpoint::new(self.head.server_time + 1, id);
        self.head
    }

    fn append(&mut self, record: ChangeRecord) {
        // Compaction: the new entry supersedes the item's earlier one.
        self.entries.retain(|e| e.id != record.id);
        self.entries.push(record);
    }

    /// Applies one pushed content change.
    ///
    /// Submissions without an identity create a new item with a fresh
    /// ID at revision 1. Submissions for an unknown ID are rejected
    /// with server revision 0.
    pub fn apply_update(&mut self, update: &ItemUpdate) -> Applied {
        let Some(id) = update.id else {
            let id = ItemId::new();
            self.items.insert(
                id,
                ItemState {
                    revision: 1,
                    tombstone: false,
                    payload: Some(update.payload.clone()),
                },
            );
            let position = self.next_position(id);
            self.append(ChangeRecord::put(id, 1, update.payload.clone(), position));
            debug!(%id, "created item");
            return Applied::Accepted(AcceptedChange {
                reference: update.reference,
                id,
                new_revision: 1,
            });
        };

        let Some(state) = self.items.get_mut(&id) else {
            return Applied::Rejected(RejectedChange {
                reference: update.reference,
                id,
                server_revision: 0,
            });
        };

        if update.revision != Some(state.revision) {
            return Applied::Rejected(RejectedChange {
                reference: update.reference,
                id,
                server_revision: state.revision,
            });
        }

        // A matching base against a tombstone resurrects the item; the
        // client made that choice knowing about the deletion.
        let new_revision = state.revision + 1;
        state.revision = new_revision;
        state.tombstone = false;
        state.payload = Some(update.payload.clone());
        let position = self.next_position(id);
        self.append(ChangeRecord::put(
            id,
            new_revision,
            update.payload.clone(),
            position,
        ));
        Applied::Accepted(AcceptedChange {
            reference: update.reference,
            id,
            new_revision,
        })
    }

    /// Applies one pushed deletion.
    pub fn apply_tombstone(&mut self, tombstone: &TombstoneUpdate) -> Applied {
        let Some(state) = self.items.get_mut(&tombstone.id) else {
            return Applied::Rejected(RejectedChange {
                reference: tombstone.reference,
                id: tombstone.id,
                server_revision: 0,
            });
        };

        if tombstone.revision != state.revision {
            return Applied::Rejected(RejectedChange {
                reference: tombstone.reference,
                id: tombstone.id,
                server_revision: state.revision,
            });
        }

        let new_revision = state.revision + 1;
        state.revision = new_revision;
        state.tombstone = true;
        state.payload = None;
        let position = self.next_position(tombstone.id);
        self.append(ChangeRecord::tombstone(
            tombstone.id,
            new_revision,
            position,
        ));
        debug!(id = %tombstone.id, "deleted item");
        Applied::Accepted(AcceptedChange {
            reference: tombstone.reference,
            id: tombstone.id,
            new_revision,
        })
    }

    /// Returns up to `limit` changes strictly after `since`, with the
    /// checkpoint the batch reaches.
    ///
    /// Identical calls against an unchanged log return identical
    /// batches. When nothing follows `since`, the returned checkpoint
    /// is the head of the stream (or `since` itself on an empty log),
    /// so a client resuming past pruned history skips ahead cleanly.
    #[must_use]
    pub fn changes_since(&self, since: Checkpoint, limit: u32) -> (Vec<ChangeRecord>, Checkpoint) {
        let batch: Vec<ChangeRecord> = self
            .entries
            .iter()
            .filter(|entry| entry.position > since)
            .take(limit as usize)
            .cloned()
            .collect();
        let to = batch
            .last()
            .map(|entry| entry.position)
            .unwrap_or(if self.head > since { self.head } else { since });
        (batch, to)
    }

    /// Drops tombstone entries recorded at or before the given logical
    /// time, along with their item states.
    ///
    /// A client whose checkpoint predates a pruned tombstone never
    /// learns of the deletion through the stream; retention windows are
    /// sized so that only abandoned replicas fall that far behind.
    pub fn prune_tombstones(&mut self, before_time: u64) -> usize {
        let pruned: Vec<ItemId> = self
            .entries
            .iter()
            .filter(|e| e.tombstone && e.position.server_time <= before_time)
            .map(|e| e.id)
            .collect();
        for id in &pruned {
            self.items.remove(id);
        }
        self.entries
            .retain(|e| !(e.tombstone && e.position.server_time <= before_time));
        pruned.len()
    }

    /// Returns the server's state for an item.
    #[must_use]
    pub fn item(&self, id: &ItemId) -> Option<&ItemState> {
        self.items.get(id)
    }

    /// Returns the position of the newest change.
    #[must_use]
    pub fn head(&self) -> Checkpoint {
        self.head
    }

    /// Returns the number of live (non-tombstoned) items.
    #[must_use]
    pub fn live_items(&self) -> usize {
        self.items.values().filter(|s| !s.tombstone).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(log: &mut ChangeLog, payload: &[u8]) -> AcceptedChange {
        match log.apply_update(&ItemUpdate::create(1, payload.to_vec())) {
            Applied::Accepted(accepted) => accepted,
            Applied::Rejected(rejected) => panic!("unexpected rejection: {rejected:?}"),
        }
    }

    #[test]
    fn creation_assigns_identity_and_revision_one() {
        let mut log = ChangeLog::new();
        let accepted = create(&mut log, b"a");

        assert_eq!(accepted.new_revision, 1);
        let state = log.item(&accepted.id).unwrap();
        assert_eq!(state.revision, 1);
        assert!(!state.tombstone);
        assert_eq!(log.live_items(), 1);
    }

    #[test]
    fn stale_base_revision_is_rejected() {
        let mut log = ChangeLog::new();
        let id = create(&mut log, b"a").id;

        // Another client advances the item to revision 2.
        log.apply_update(&ItemUpdate::update(2, id, 1, b"b".to_vec()));

        let result = log.apply_update(&ItemUpdate::update(3, id, 1, b"c".to_vec()));
        let Applied::Rejected(rejected) = result else {
            panic!("stale update was accepted");
        };
        assert_eq!(rejected.server_revision, 2);
        assert_eq!(log.item(&id).unwrap().payload.as_deref(), Some(&b"b"[..]));
    }

    #[test]
    fn unknown_item_is_rejected_with_revision_zero() {
        let mut log = ChangeLog::new();
        let result = log.apply_update(&ItemUpdate::update(1, ItemId::new(), 3, vec![]));
        assert!(matches!(
            result,
            Applied::Rejected(RejectedChange {
                server_revision: 0,
                ..
            })
        ));
    }

    #[test]
    fn tombstone_advances_revision_and_clears_payload() {
        let mut log = ChangeLog::new();
        let id = create(&mut log, b"a").id;

        let result = log.apply_tombstone(&TombstoneUpdate::new(2, id, 1));
        let Applied::Accepted(accepted) = result else {
            panic!("tombstone rejected");
        };
        assert_eq!(accepted.new_revision, 2);
        let state = log.item(&id).unwrap();
        assert!(state.tombstone);
        assert_eq!(state.payload, None);
        assert_eq!(log.live_items(), 0);
    }

    #[test]
    fn matching_base_resurrects_a_tombstoned_item() {
        let mut log = ChangeLog::new();
        let id = create(&mut log, b"a").id;
        log.apply_tombstone(&TombstoneUpdate::new(2, id, 1));

        // The client saw the deletion (revision 2) and chose to keep
        // its local version anyway.
        let result = log.apply_update(&ItemUpdate::update(3, id, 2, b"kept".to_vec()));
        assert!(matches!(result, Applied::Accepted(_)));
        let state = log.item(&id).unwrap();
        assert!(!state.tombstone);
        assert_eq!(state.revision, 3);
    }

    #[test]
    fn changes_since_pages_in_order() {
        let mut log = ChangeLog::new();
        let first = create(&mut log, b"a");
        let second = create(&mut log, b"b");
        let third = create(&mut log, b"c");

        let (page, to) = log.changes_since(Checkpoint::origin(), 2);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, first.id);
        assert_eq!(page[1].id, second.id);

        let (page, to) = log.changes_since(to, 2);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, third.id);
        assert_eq!(to, log.head());

        let (page, final_to) = log.changes_since(to, 2);
        assert!(page.is_empty());
        assert_eq!(final_to, to);
    }

    #[test]
    fn compaction_keeps_only_the_latest_entry_per_item() {
        let mut log = ChangeLog::new();
        let id = create(&mut log, b"v1").id;
        log.apply_update(&ItemUpdate::update(2, id, 1, b"v2".to_vec()));
        log.apply_update(&ItemUpdate::update(3, id, 2, b"v3".to_vec()));

        let (page, _) = log.changes_since(Checkpoint::origin(), 100);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].revision, 3);
        assert_eq!(page[0].payload.as_deref(), Some(&b"v3"[..]));
    }

    #[test]
    fn identical_pulls_return_identical_batches() {
        let mut log = ChangeLog::new();
        create(&mut log, b"a");
        create(&mut log, b"b");

        let first = log.changes_since(Checkpoint::origin(), 10);
        let second = log.changes_since(Checkpoint::origin(), 10);
        assert_eq!(first, second);
    }

    #[test]
    fn pruning_drops_old_tombstones_only() {
        let mut log = ChangeLog::new();
        let doomed = create(&mut log, b"a").id;
        let kept = create(&mut log, b"b").id;
        log.apply_tombstone(&TombstoneUpdate::new(3, doomed, 1));
        let horizon = log.head().server_time;
        log.apply_tombstone(&TombstoneUpdate::new(4, kept, 1));

        assert_eq!(log.prune_tombstones(horizon), 1);
        assert!(log.item(&doomed).is_none());
        assert!(log.item(&kept).unwrap().tombstone);

        let (page, _) = log.changes_since(Checkpoint::origin(), 100);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, kept);
    }
}

//! Conflict escalation.
//!
//! The engine never resolves a content conflict on its own. A
//! [`ConflictResolver`] is handed both versions and either picks a side
//! or declines, in which case the item is parked: it keeps its local
//! content and stale revision, and is re-offered on the next cycle.

use crate::merge::Resolution;
use citesync_protocol::ItemId;

/// Everything a resolver needs to present a conflict.
#[derive(Debug, Clone)]
pub struct ConflictContext {
    /// The conflicted item.
    pub id: ItemId,
    /// The local content, absent when the local side is a pending
    /// deletion.
    pub local: Option<Vec<u8>>,
    /// The remote content, absent when the server side is a tombstone.
    pub remote: Option<Vec<u8>>,
    /// The server's revision of the item.
    pub server_revision: u64,
    /// The client's base revision of the item.
    pub local_revision: Option<u64>,
}

impl ConflictContext {
    /// True when the server side of the conflict is a deletion.
    #[must_use]
    pub fn remote_deleted(&self) -> bool {
        self.remote.is_none()
    }

    /// True when the local side of the conflict is a pending deletion.
    #[must_use]
    pub fn local_deleted(&self) -> bool {
        self.local.is_none()
    }
}

/// Decides conflicts on behalf of the user.
///
/// Returning `None` parks the item for this cycle. Implementations are
/// called from the sync thread and should not block indefinitely.
pub trait ConflictResolver: Send + Sync {
    /// Picks a side, or declines.
    fn resolve(&self, context: &ConflictContext) -> Option<Resolution>;
}

/// Resolver for headless operation: parks every conflict.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unattended;

impl ConflictResolver for Unattended {
    fn resolve(&self, _context: &ConflictContext) -> Option<Resolution> {
        None
    }
}

impl<F> ConflictResolver for F
where
    F: Fn(&ConflictContext) -> Option<Resolution> + Send + Sync,
{
    fn resolve(&self, context: &ConflictContext) -> Option<Resolution> {
        self(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unattended_parks_everything() {
        let context = ConflictContext {
            id: ItemId::new(),
            local: Some(vec![1]),
            remote: Some(vec![2]),
            server_revision: 2,
            local_revision: Some(1),
        };
        assert_eq!(Unattended.resolve(&context), None);
        assert!(!context.remote_deleted());
        assert!(!context.local_deleted());
    }

    #[test]
    fn closures_are_resolvers() {
        let always_remote = |_: &ConflictContext| Some(Resolution::AcceptRemote);
        let context = ConflictContext {
            id: ItemId::new(),
            local: None,
            remote: Some(vec![2]),
            server_revision: 5,
            local_revision: Some(3),
        };
        assert_eq!(always_remote.resolve(&context), Some(Resolution::AcceptRemote));
        assert!(context.local_deleted());
    }
}

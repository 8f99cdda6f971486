//! Change notifications for the event subscription channel.

use crate::id::ItemId;
use serde::{Deserialize, Serialize};

/// A server-pushed notification that items have changed.
///
/// Delivered over the event subscription channel once a client is caught
/// up; receipt triggers a new pull cycle. The notification is a hint, not
/// a delta: the pull cycle is the only source of truth for the changes
/// themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotification {
    /// Items that changed server-side.
    pub changed_ids: Vec<ItemId>,
}

impl ChangeNotification {
    /// Creates a notification for the given items.
    #[must_use]
    pub fn new(changed_ids: Vec<ItemId>) -> Self {
        Self { changed_ids }
    }
}

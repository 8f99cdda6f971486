//! Pull and push protocol messages.

use crate::change::ChangeRecord;
use crate::checkpoint::Checkpoint;
use crate::id::ItemId;
use serde::{Deserialize, Serialize};

/// Pull request from client.
///
/// Requests the batch of server changes after `since`. Pagination is
/// expressed by repeated pulls with the evolving checkpoint until an empty
/// batch is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Pull changes strictly after this checkpoint.
    pub since: Checkpoint,
    /// Maximum number of changes to return.
    pub limit: u32,
}

impl PullRequest {
    /// Creates a new pull request.
    #[must_use]
    pub const fn new(since: Checkpoint, limit: u32) -> Self {
        Self { since, limit }
    }
}

/// Pull response from server.
///
/// The `to` token means "all server state up to this point is included in
/// `changes`". For the same `since` against an unchanged server log, the
/// response is identical on every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    /// Changes after the requested checkpoint, in stream order.
    pub changes: Vec<ChangeRecord>,
    /// Checkpoint reached after merging `changes`.
    pub to: Checkpoint,
}

impl PullResponse {
    /// Creates a new pull response.
    #[must_use]
    pub fn new(changes: Vec<ChangeRecord>, to: Checkpoint) -> Self {
        Self { changes, to }
    }

    /// Creates an empty response meaning "caught up".
    #[must_use]
    pub fn caught_up(at: Checkpoint) -> Self {
        Self {
            changes: Vec::new(),
            to: at,
        }
    }
}

/// One item content submission in a push request.
///
/// Items not yet known to the server are submitted without an `id` or
/// `revision`; the server assigns both on acceptance. The `reference` is a
/// client-scoped correlation token echoed back in the response, since
/// id-less new items cannot be correlated any other way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemUpdate {
    /// Client-scoped correlation token, echoed in the response.
    pub reference: u64,
    /// The item's ID, if it has been assigned one.
    pub id: Option<ItemId>,
    /// The client's current revision, the compare-and-swap basis.
    pub revision: Option<u64>,
    /// The item content.
    pub payload: Vec<u8>,
}

impl ItemUpdate {
    /// Creates a submission for an already-synced item.
    #[must_use]
    pub fn update(reference: u64, id: ItemId, revision: u64, payload: Vec<u8>) -> Self {
        Self {
            reference,
            id: Some(id),
            revision: Some(revision),
            payload,
        }
    }

    /// Creates a submission for a brand-new item with no identity yet.
    #[must_use]
    pub fn create(reference: u64, payload: Vec<u8>) -> Self {
        Self {
            reference,
            id: None,
            revision: None,
            payload,
        }
    }

    /// Returns true if this submission has no server identity yet.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }
}

/// One deletion submission in a push request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TombstoneUpdate {
    /// Client-scoped correlation token, echoed in the response.
    pub reference: u64,
    /// The deleted item.
    pub id: ItemId,
    /// The client's revision for the item, the compare-and-swap basis.
    pub revision: u64,
}

impl TombstoneUpdate {
    /// Creates a deletion submission.
    #[must_use]
    pub const fn new(reference: u64, id: ItemId, revision: u64) -> Self {
        Self {
            reference,
            id,
            revision,
        }
    }
}

/// Push request from client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Dirty and brand-new items.
    pub updates: Vec<ItemUpdate>,
    /// Pending local deletions.
    pub tombstones: Vec<TombstoneUpdate>,
}

impl PushRequest {
    /// Creates a new push request.
    #[must_use]
    pub fn new(updates: Vec<ItemUpdate>, tombstones: Vec<TombstoneUpdate>) -> Self {
        Self {
            updates,
            tombstones,
        }
    }

    /// Returns true if there is nothing to push.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.tombstones.is_empty()
    }
}

/// One accepted submission in a push response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedChange {
    /// The correlation token from the submission.
    pub reference: u64,
    /// The item's ID, server-assigned for new items.
    pub id: ItemId,
    /// The new server-assigned revision.
    pub new_revision: u64,
}

/// One rejected submission in a push response.
///
/// A rejection is not an error: the submitted revision simply no longer
/// matched the server's, and the item is retried in a later cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedChange {
    /// The correlation token from the submission.
    pub reference: u64,
    /// The item whose submission was rejected.
    pub id: ItemId,
    /// The revision currently stored server-side.
    pub server_revision: u64,
}

/// Push response from server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushResponse {
    /// Submissions whose compare-and-swap matched.
    pub accepted: Vec<AcceptedChange>,
    /// Submissions whose compare-and-swap failed.
    pub rejected: Vec<RejectedChange>,
}

impl PushResponse {
    /// Creates a new push response.
    #[must_use]
    pub fn new(accepted: Vec<AcceptedChange>, rejected: Vec<RejectedChange>) -> Self {
        Self { accepted, rejected }
    }
}

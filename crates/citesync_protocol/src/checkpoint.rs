//! Resumable sync checkpoints.

use crate::id::ItemId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A resumption token marking a position in the server change stream.
///
/// A checkpoint means "all server-side changes up to this point have been
/// merged locally". It orders by `server_time` first, with the item ID as
/// a tie-break for changes sharing the same server time.
///
/// The tie-break ordering is an implementation detail of the change
/// stream: it is stable across repeated pulls with the same `since` value,
/// but carries no cross-batch meaning for consumers. Clients must treat
/// checkpoints as opaque.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Server-side logical time of the last merged change.
    pub server_time: u64,
    /// Tie-break for changes sharing a server time.
    pub tie_break: ItemId,
}

impl Checkpoint {
    /// Creates a checkpoint at the given position.
    #[must_use]
    pub const fn new(server_time: u64, tie_break: ItemId) -> Self {
        Self {
            server_time,
            tie_break,
        }
    }

    /// The origin checkpoint, before any change has been merged.
    ///
    /// Pulling from the origin replays the entire change stream.
    #[must_use]
    pub const fn origin() -> Self {
        Self {
            server_time: 0,
            tie_break: ItemId::from_bytes([0u8; 16]),
        }
    }

    /// Returns true if this is the origin checkpoint.
    #[must_use]
    pub fn is_origin(&self) -> bool {
        *self == Self::origin()
    }
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self::origin()
    }
}

impl fmt::Debug for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checkpoint({}, {})", self.server_time, self.tie_break)
    }
}

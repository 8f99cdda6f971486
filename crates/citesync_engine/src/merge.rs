//! The per-item merge decision function.
//!
//! `decide` is deliberately pure: it inspects revisions and flags and
//! returns an outcome, with no side effects. A merge batch replayed after
//! a crash (before the checkpoint advanced) therefore reproduces the
//! exact same outcomes, which is the engine's core resumability
//! guarantee.

use thiserror::Error;

/// The client-side view of one item at merge time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocalState {
    /// The revision last acknowledged by the server, if the item has
    /// one. `None` means the item is unknown locally (or has never been
    /// pushed, in which case the server cannot reference it anyway).
    pub revision: Option<u64>,
    /// True if the item has been locally modified since its last sync.
    pub dirty: bool,
    /// True if a local deletion of the item is pending propagation.
    pub tombstone: bool,
}

impl LocalState {
    /// State for an item the client has never seen.
    #[must_use]
    pub const fn absent() -> Self {
        Self {
            revision: None,
            dirty: false,
            tombstone: false,
        }
    }
}

/// The outcome of merging one server change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Nothing to do; both sides already agree.
    NoOp,
    /// Adopt the server content and revision, clearing the dirty flag.
    ReplaceLocal,
    /// Remove the item locally, discarding any local tombstone for it.
    DeleteLocal,
    /// Both sides hold diverging uncommitted changes; escalate to a
    /// human decision. Never resolved by heuristic.
    Conflict,
}

/// A conflict resolution supplied by the external resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Keep the local version: adopt the server revision as the new
    /// compare-and-swap base but stay dirty, so the local version is
    /// re-offered on the next push.
    KeepLocal,
    /// Accept the remote version: adopt the server content and revision
    /// and become clean.
    AcceptRemote,
}

/// The server sent an older revision than the client holds.
///
/// Under correct server behavior a revision never decreases, so this is
/// a non-retryable consistency fault, not a mergeable state.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("server revision {server_revision} behind local revision {local_revision}")]
pub struct RevisionRegression {
    /// The revision the server sent.
    pub server_revision: u64,
    /// The revision the client holds.
    pub local_revision: u64,
}

/// Decides the outcome of one server change against local state.
///
/// Rules, evaluated in order:
/// 1. Server tombstone: local tombstone ⇒ `NoOp`; locally dirty ⇒
///    `Conflict`; otherwise `DeleteLocal` (an unknown item is a `NoOp`,
///    there is nothing to delete).
/// 2. Server revision above local: pending local deletion or dirty
///    content ⇒ `Conflict`; otherwise `ReplaceLocal`. An item without a
///    local revision is new from the server and replaces nothing.
/// 3. Equal revisions ⇒ `NoOp`.
/// 4. Server revision below local ⇒ `RevisionRegression`.
pub fn decide(
    server_revision: u64,
    server_tombstone: bool,
    local: LocalState,
) -> Result<MergeOutcome, RevisionRegression> {
    if server_tombstone {
        if local.tombstone {
            return Ok(MergeOutcome::NoOp);
        }
        if local.revision.is_none() {
            return Ok(MergeOutcome::NoOp);
        }
        if local.dirty {
            return Ok(MergeOutcome::Conflict);
        }
        return Ok(MergeOutcome::DeleteLocal);
    }

    match local.revision {
        None => Ok(MergeOutcome::ReplaceLocal),
        Some(local_revision) => {
            if server_revision > local_revision {
                if local.tombstone || local.dirty {
                    Ok(MergeOutcome::Conflict)
                } else {
                    Ok(MergeOutcome::ReplaceLocal)
                }
            } else if server_revision == local_revision {
                Ok(MergeOutcome::NoOp)
            } else {
                Err(RevisionRegression {
                    server_revision,
                    local_revision,
                })
            }
        }
    }
}

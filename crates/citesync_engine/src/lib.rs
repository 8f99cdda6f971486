//! # CiteSync Engine
//!
//! Pull-merge-push sync state machine and merge engine for CiteSync.
//!
//! This crate provides:
//! - The pure per-item merge decision function (`decide`)
//! - The sync session state machine (idle → pulling → merging → pushing,
//!   with an event-listening fallback once caught up)
//! - Checkpoint-bounded resumable pulls
//! - The transport abstraction (mock and HTTP adapters)
//! - The conflict resolver seam for escalating genuine conflicts
//!
//! ## Architecture
//!
//! The engine implements a **pull-then-push** synchronization model
//! against a single authoritative server:
//! 1. Pull batches of server changes since the last checkpoint
//! 2. Merge each change through the pure decision function
//! 3. Push dirty items, new items, and pending tombstones
//!
//! ## Key Invariants
//!
//! - The server is authoritative; per-item revisions only it advances
//! - Pull always happens before push
//! - Merge decisions are deterministic, so replaying a batch after a
//!   crash (before the checkpoint advanced) reproduces the same state
//! - Genuine conflicts are escalated, never silently merged
//! - All sync metadata mutation funnels through one session at a time

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod http;
mod merge;
mod resolver;
mod session;
mod store;
mod transport;

pub use config::{RetryConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpTransport};
pub use merge::{decide, LocalState, MergeOutcome, Resolution, RevisionRegression};
pub use resolver::{ConflictContext, ConflictResolver, Unattended};
pub use session::{SyncClient, SyncPhase, SyncReport, SyncStats};
pub use store::{ItemStore, LibraryStore, PendingUpdate};
pub use transport::{MockTransport, SyncTransport};

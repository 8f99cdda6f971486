//! # CiteSync Server
//!
//! The authoritative side of the CiteSync protocol: the item table,
//! the ordered change stream, compare-and-swap revision checks, and
//! change-notification fan-out.
//!
//! The crate has no network surface of its own. [`SyncServer`] handles
//! decoded protocol messages for in-process use and CBOR bytes for
//! mounting behind an HTTP framework; tests and embedded deployments
//! talk to it directly.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_log;
mod config;
mod error;
mod server;

pub use change_log::{Applied, ChangeLog, ItemState};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::SyncServer;

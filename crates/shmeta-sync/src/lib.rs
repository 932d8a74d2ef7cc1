//! Metadata synchronization for shmeta.
//!
//! [`SyncEngine`] drives one connected channel: it performs the handshake,
//! submits descriptors for creation, fetches them back with their members
//! resolved, enumerates the local namespace, and implements the bounded
//! `wait` loop that polls the instance until an entry created elsewhere in
//! the cluster becomes visible.

pub mod config;
pub mod engine;
pub mod error;
pub mod liveness;
pub mod options;

pub use config::SyncConfig;
pub use engine::{Registration, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use liveness::Liveness;
pub use options::{DeleteOptions, GetOptions, ListOptions};

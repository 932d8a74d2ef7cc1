//! Store instances for shmeta.
//!
//! A [`StoreInstance`] is one node of the cluster: it owns a metadata
//! [`Namespace`], assigns object ids, seals descriptors, and answers the
//! requests of the clients connected to it. Instances exchange metadata
//! through a [`Cluster`] backplane, an append-only change log that becomes
//! visible to other instances after a configurable propagation delay and only
//! when they run a synchronization round.
//!
//! # Visibility Rules
//!
//! 1. A created entry is visible to clients of the creating instance at once.
//! 2. Other instances see it after the propagation delay, on their next sync.
//! 3. Deletions travel the same way as creations.
//! 4. Names live in the backplane itself and are consistent cluster-wide.
//! 5. Ids are never reused, not even after an instance slot is recycled.
//! 6. A newly joined instance receives the live records of the compacted log
//!    prefix, then the retained tail.
//!
//! [`InProcessChannel`] connects a client to an instance living in the same
//! process; the `shmeta-server` crate exposes an instance over sockets.

pub mod channel;
pub mod cluster;
pub mod config;
pub mod error;
pub mod instance;
pub mod namespace;
pub mod session;

pub use channel::InProcessChannel;
pub use cluster::{Change, Cluster};
pub use config::{ClusterConfig, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use instance::{StoreInstance, SERVER_VERSION};
pub use namespace::Namespace;
pub use session::Session;

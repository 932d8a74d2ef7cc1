//! Foundation types for shmeta.
//!
//! This crate provides the identity types shared by every other shmeta crate.
//! They are plain values: no behavior beyond construction, equality, ordering
//! and stable rendering for logs and diagnostics.
//!
//! # Key Types
//!
//! - [`ObjectId`]: Cluster-unique 64-bit object identifier, assigned by the store
//! - [`InstanceId`]: Identifier of one store instance in the cluster
//! - [`ErrorKind`]: Error classification shared by every layer and carried on the wire

pub mod error;
pub mod instance;
pub mod object;

pub use error::{ErrorKind, TypeError};
pub use instance::InstanceId;
pub use object::ObjectId;

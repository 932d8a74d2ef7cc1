//! Object descriptors for shmeta.
//!
//! An [`ObjectMeta`] is the metadata record of one stored object: a typename,
//! a bag of scalar properties and named references to member objects. Callers
//! build descriptors in memory; the store assigns the id and seals them as one
//! atomic step, after which a descriptor never changes again.
//!
//! # Design Rules
//!
//! 1. Callers never seal. A sealed descriptor only comes out of a
//!    store-issued [`MetaRecord`].
//! 2. Every member of a sealed descriptor is itself sealed.
//! 3. Properties and members share one key space.
//! 4. Dangling member ids are accepted while building and rejected when the
//!    descriptor is submitted.

pub mod error;
pub mod meta;
pub mod pattern;
pub mod record;
pub mod value;

pub use error::{MetaError, MetaResult};
pub use meta::{Member, ObjectMeta, Resolver, JSON_DEPTH};
pub use pattern::TypenamePattern;
pub use record::{MetaRecord, BLOB_TYPENAME};
pub use value::MetaValue;

//! Wire protocol for shmeta.
//!
//! Defines the request/response messages exchanged between clients and store
//! instances, the length-prefixed framing used on byte streams, the
//! [`Channel`] abstraction the synchronization engine talks through, and the
//! two addressing schemes (local socket path and remote `host:port`).

pub mod channel;
pub mod codec;
pub mod endpoint;
pub mod error;
pub mod message;

pub use channel::{Channel, Interrupt, StreamChannel, Transport};
pub use codec::{MetaCodec, WireMessage};
pub use endpoint::Endpoint;
pub use error::{ProtocolError, ProtocolResult};
pub use message::{
    ClientKind, ClusterMember, InstanceStatus, Request, Response, MAX_MESSAGE_SIZE,
    PROTOCOL_VERSION,
};

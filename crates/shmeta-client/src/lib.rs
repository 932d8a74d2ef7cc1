//! Client facade for shmeta.
//!
//! A client connects to one store instance, either over the local socket
//! ([`IpcClient`]) or over the network ([`RpcClient`]), and exposes the
//! metadata operations of the [`Client`] trait. [`Connection`] picks the
//! variant from a [`ClientConfig`].
//!
//! ```no_run
//! use shmeta_client::{Client, ClientConfig, Connection, GetOptions, ObjectMeta};
//!
//! let conn = Connection::open(&ClientConfig::default())?;
//! let mut meta = ObjectMeta::new("int32");
//! meta.set("value", 42)?;
//! let created = conn.create_metadata(&meta)?;
//! let fetched = conn.get_metadata(created.id().unwrap(), &GetOptions::default())?;
//! assert_eq!(fetched.get_int("value"), Some(42));
//! conn.disconnect();
//! # Ok::<(), shmeta_client::ClientError>(())
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;

pub use client::{Client, IpcClient, RpcClient};
pub use config::{ClientConfig, ConfigError};
pub use connection::Connection;
pub use error::{ClientError, ClientResult};

pub use shmeta_meta::{MetaValue, ObjectMeta, TypenamePattern, JSON_DEPTH};
pub use shmeta_protocol::{ClusterMember, Endpoint, InstanceStatus};
pub use shmeta_sync::{DeleteOptions, GetOptions, ListOptions, SyncConfig};
pub use shmeta_types::{ErrorKind, InstanceId, ObjectId};

//! Daemon for shmeta.
//!
//! Hosts one store instance and accepts clients on a Unix socket (IPC) and
//! a TCP port (RPC). Each connection gets its own task and its own session;
//! frames are the same `[len][tag][bincode]` frames the blocking clients
//! speak.

pub mod config;
pub mod error;
pub mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::{BoundServer, MetaServer};

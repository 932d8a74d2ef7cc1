use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Where a store instance can be reached.
///
/// The scheme is chosen once, at construction, and selects which facade
/// variant a connection uses.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Endpoint {
    /// Local socket path (same-machine IPC).
    Ipc(PathBuf),
    /// `host:port` of a remote instance (cluster RPC).
    Rpc(String),
}

impl Endpoint {
    pub fn ipc(path: impl Into<PathBuf>) -> Self {
        Self::Ipc(path.into())
    }

    pub fn rpc(addr: impl Into<String>) -> Self {
        Self::Rpc(addr.into())
    }

    /// Parse `ipc://<path>`, `rpc://<host:port>` (or `tcp://`), a bare
    /// absolute or relative path, or a bare `host:port`.
    pub fn parse(s: &str) -> Result<Self, ProtocolError> {
        let invalid = || ProtocolError::InvalidEndpoint(s.to_string());
        if let Some(path) = s.strip_prefix("ipc://") {
            if path.is_empty() {
                return Err(invalid());
            }
            return Ok(Self::Ipc(PathBuf::from(path)));
        }
        let addr = s
            .strip_prefix("rpc://")
            .or_else(|| s.strip_prefix("tcp://"));
        if let Some(addr) = addr {
            return validate_host_port(addr).map(Self::Rpc).ok_or_else(invalid);
        }
        if s.starts_with('/') || s.starts_with('.') {
            return Ok(Self::Ipc(PathBuf::from(s)));
        }
        validate_host_port(s).map(Self::Rpc).ok_or_else(invalid)
    }

    pub fn is_ipc(&self) -> bool {
        matches!(self, Self::Ipc(_))
    }

    pub fn is_rpc(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }

    pub fn ipc_path(&self) -> Option<&Path> {
        match self {
            Self::Ipc(path) => Some(path),
            Self::Rpc(_) => None,
        }
    }

    pub fn rpc_addr(&self) -> Option<&str> {
        match self {
            Self::Rpc(addr) => Some(addr),
            Self::Ipc(_) => None,
        }
    }
}

fn validate_host_port(s: &str) -> Option<String> {
    let (host, port) = s.rsplit_once(':')?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return None;
    }
    Some(s.to_string())
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipc(path) => write!(f, "ipc://{}", path.display()),
            Self::Rpc(addr) => write!(f, "rpc://{addr}"),
        }
    }
}

impl FromStr for Endpoint {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Endpoint {
    type Error = ProtocolError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

use std::path::Path;

use serde::{Deserialize, Serialize};
use shmeta_protocol::{Endpoint, ProtocolError};
use shmeta_sync::SyncConfig;

/// Environment variable naming the local socket of the instance.
pub const IPC_SOCKET_ENV: &str = "SHMETA_IPC_SOCKET";
/// Environment variable naming the `host:port` of a remote instance.
pub const RPC_ENDPOINT_ENV: &str = "SHMETA_RPC_ENDPOINT";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Endpoint(#[from] ProtocolError),
}

/// Where to connect and how to wait.
///
/// ```toml
/// endpoint = "rpc://10.0.0.5:9600"
///
/// [sync]
/// retry_interval_ms = 50
/// wait_timeout_ms = 10000
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub endpoint: Endpoint,
    pub sync: SyncConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::ipc("/tmp/shmeta.sock"),
            sync: SyncConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            ..Self::default()
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Default configuration with the endpoint taken from the environment.
    /// The IPC socket wins when both variables are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let endpoint = match (lookup(IPC_SOCKET_ENV), lookup(RPC_ENDPOINT_ENV)) {
            (Some(socket), _) if !socket.is_empty() => Endpoint::ipc(socket),
            (_, Some(addr)) if !addr.is_empty() => Endpoint::parse(&format!("rpc://{addr}"))?,
            _ => return Ok(Self::default()),
        };
        Ok(Self::new(endpoint))
    }
}

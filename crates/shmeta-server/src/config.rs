use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use shmeta_store::StoreConfig;

use crate::error::{ServerError, ServerResult};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub ipc_socket: PathBuf,
    pub rpc_addr: SocketAddr,
    pub hostname: String,
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ipc_socket: PathBuf::from("/tmp/shmeta.sock"),
            rpc_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 9600)),
            hostname: "localhost".into(),
            max_connections: 256,
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(s: &str) -> ServerResult<Self> {
        toml::from_str(s).map_err(|e| ServerError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> ServerResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Identity the hosted instance reports to clients.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            hostname: self.hostname.clone(),
            ipc_socket: self.ipc_socket.display().to_string(),
            rpc_endpoint: self.rpc_addr.to_string(),
        }
    }
}

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identity an instance reports to connecting clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub hostname: String,
    /// Local socket path clients on this machine connect to.
    pub ipc_socket: String,
    /// `host:port` remote clients connect to.
    pub rpc_endpoint: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".into(),
            ipc_socket: "/tmp/shmeta.sock".into(),
            rpc_endpoint: "127.0.0.1:9600".into(),
        }
    }
}

/// Behavior of the cluster backplane.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Delay before a published change becomes pullable by other instances.
    pub propagation_delay_ms: u64,
}

impl ClusterConfig {
    pub fn with_propagation_delay(delay: Duration) -> Self {
        Self {
            propagation_delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn propagation_delay(&self) -> Duration {
        Duration::from_millis(self.propagation_delay_ms)
    }
}

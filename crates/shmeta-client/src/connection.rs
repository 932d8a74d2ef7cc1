use std::ops::Deref;

use shmeta_protocol::{Channel, Endpoint};

use crate::client::{Client, IpcClient, RpcClient};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// A client whose variant is picked by the configured endpoint.
///
/// Dereferences to [`Client`], so every operation is available directly.
#[derive(Debug)]
pub enum Connection {
    Ipc(IpcClient),
    Rpc(RpcClient),
}

impl Connection {
    /// Connect to the configured endpoint and register.
    pub fn open(config: &ClientConfig) -> ClientResult<Self> {
        match &config.endpoint {
            #[cfg(unix)]
            Endpoint::Ipc(path) => Ok(Self::Ipc(IpcClient::connect(path, config.sync.clone())?)),
            #[cfg(not(unix))]
            Endpoint::Ipc(path) => Err(ClientError::Connection(format!(
                "local sockets are not supported on this platform: {}",
                path.display()
            ))),
            Endpoint::Rpc(addr) => Ok(Self::Rpc(RpcClient::connect(addr, config.sync.clone())?)),
        }
    }

    /// Register over a channel that is already connected to the instance the
    /// configuration names.
    pub fn with_channel(config: &ClientConfig, channel: Box<dyn Channel>) -> ClientResult<Self> {
        let sync = config.sync.clone();
        match config.endpoint {
            Endpoint::Ipc(_) => Ok(Self::Ipc(IpcClient::with_channel(channel, sync)?)),
            Endpoint::Rpc(_) => Ok(Self::Rpc(RpcClient::with_channel(channel, sync)?)),
        }
    }

    /// Configuration from the environment, then [`Connection::open`].
    pub fn from_env() -> ClientResult<Self> {
        let config = ClientConfig::from_env().map_err(ClientError::from)?;
        Self::open(&config)
    }

    pub fn client(&self) -> &(dyn Client + 'static) {
        match self {
            Self::Ipc(c) => c as &dyn Client,
            Self::Rpc(c) => c as &dyn Client,
        }
    }
}

impl Deref for Connection {
    type Target = dyn Client;

    fn deref(&self) -> &Self::Target {
        self.client()
    }
}

use std::collections::BTreeMap;
use std::path::Path;

use shmeta_meta::{MetaValue, ObjectMeta};
use shmeta_protocol::{Channel, ClientKind, ClusterMember, InstanceStatus, StreamChannel};
use shmeta_sync::{DeleteOptions, GetOptions, ListOptions, SyncConfig, SyncEngine};
use shmeta_types::{InstanceId, ObjectId};
use tracing::debug;

use crate::error::{ClientError, ClientResult};

mod private {
    use shmeta_sync::SyncEngine;

    pub trait Sealed {
        fn engine(&self) -> &SyncEngine;
    }
}

/// Operations every connection to a store instance offers.
///
/// Implemented by [`IpcClient`] and [`RpcClient`] only. Both are `Send +
/// Sync`; concurrent calls on one client are serialized in submission order.
pub trait Client: private::Sealed + Send + Sync {
    fn kind(&self) -> ClientKind;

    fn is_ipc(&self) -> bool {
        self.kind() == ClientKind::Ipc
    }

    fn is_rpc(&self) -> bool {
        self.kind() == ClientKind::Rpc
    }

    /// Instance this client registered with.
    fn instance_id(&self) -> InstanceId {
        self.engine().registration().instance_id
    }

    /// Local socket the instance reported at handshake.
    fn ipc_socket(&self) -> &str {
        &self.engine().registration().ipc_socket
    }

    /// RPC endpoint the instance reported at handshake.
    fn rpc_endpoint(&self) -> &str {
        &self.engine().registration().rpc_endpoint
    }

    /// Software release the instance reported at handshake.
    fn version(&self) -> &str {
        &self.engine().registration().server_version
    }

    /// Whether the connection is still usable. No side effects.
    fn connected(&self) -> bool {
        self.engine().is_open()
    }

    /// Close the connection. Never fails; calling it again does nothing.
    fn disconnect(&self) {
        self.engine().close();
    }

    fn create_metadata(&self, meta: &ObjectMeta) -> ClientResult<ObjectMeta> {
        Ok(self.engine().create(meta)?)
    }

    fn get_metadata(&self, id: ObjectId, options: &GetOptions) -> ClientResult<ObjectMeta> {
        Ok(self.engine().get(id, options)?)
    }

    fn get_metadatas(&self, ids: &[ObjectId], options: &GetOptions) -> ClientResult<Vec<ObjectMeta>> {
        Ok(self.engine().get_many(ids, options)?)
    }

    fn list_metadata(&self, options: &ListOptions) -> ClientResult<Vec<ObjectMeta>> {
        Ok(self.engine().list(options)?)
    }

    fn exists(&self, id: ObjectId) -> ClientResult<bool> {
        Ok(self.engine().exists(id)?)
    }

    /// Pull changes from the rest of the cluster into the instance now.
    fn sync_meta(&self) -> ClientResult<()> {
        Ok(self.engine().sync_meta()?)
    }

    fn delete(&self, ids: &[ObjectId], options: &DeleteOptions) -> ClientResult<Vec<ObjectId>> {
        Ok(self.engine().delete(ids, options)?)
    }

    fn put_name(&self, id: ObjectId, name: &str) -> ClientResult<()> {
        Ok(self.engine().put_name(id, name)?)
    }

    fn get_name(&self, name: &str, wait: bool) -> ClientResult<ObjectId> {
        Ok(self.engine().get_name(name, wait)?)
    }

    fn drop_name(&self, name: &str) -> ClientResult<()> {
        Ok(self.engine().drop_name(name)?)
    }

    fn list_names(&self, options: &ListOptions) -> ClientResult<Vec<(String, ObjectId)>> {
        Ok(self.engine().list_names(options)?)
    }

    fn status(&self) -> ClientResult<InstanceStatus> {
        Ok(self.engine().status()?)
    }

    /// New object with the properties of `id`, overridden by `extra`. The
    /// copy references the same members.
    fn shallow_copy(&self, id: ObjectId, extra: &BTreeMap<String, MetaValue>) -> ClientResult<ObjectId> {
        Ok(self.engine().shallow_copy(id, extra)?)
    }

    /// Delete every object the instance holds.
    fn clear(&self) -> ClientResult<Vec<ObjectId>> {
        Ok(self.engine().clear()?)
    }

    fn reset(&self) -> ClientResult<Vec<ObjectId>> {
        self.clear()
    }

    /// Host and join time of every instance in the cluster.
    fn cluster_info(&self) -> ClientResult<BTreeMap<InstanceId, ClusterMember>> {
        Ok(self.engine().cluster_info()?)
    }
}

/// Client on the same machine as its instance.
#[derive(Debug)]
pub struct IpcClient {
    engine: SyncEngine,
}

impl IpcClient {
    /// Connect to the instance listening on `socket`.
    #[cfg(unix)]
    pub fn connect(socket: impl AsRef<Path>, config: SyncConfig) -> ClientResult<Self> {
        let socket = socket.as_ref();
        debug!(socket = %socket.display(), "connecting over ipc");
        let channel = StreamChannel::connect_ipc(socket)?;
        Self::with_channel(Box::new(channel), config)
    }

    /// Register over an already connected channel.
    pub fn with_channel(channel: Box<dyn Channel>, config: SyncConfig) -> ClientResult<Self> {
        let engine = SyncEngine::handshake(channel, ClientKind::Ipc, config).map_err(connection_error)?;
        Ok(Self { engine })
    }
}

impl private::Sealed for IpcClient {
    fn engine(&self) -> &SyncEngine {
        &self.engine
    }
}

impl Client for IpcClient {
    fn kind(&self) -> ClientKind {
        ClientKind::Ipc
    }
}

/// Client reaching its instance over the network.
#[derive(Debug)]
pub struct RpcClient {
    engine: SyncEngine,
}

impl RpcClient {
    /// Connect to the instance at `addr` (`host:port`).
    pub fn connect(addr: &str, config: SyncConfig) -> ClientResult<Self> {
        debug!(addr, "connecting over rpc");
        let channel = StreamChannel::connect_rpc(addr)?;
        Self::with_channel(Box::new(channel), config)
    }

    pub fn with_channel(channel: Box<dyn Channel>, config: SyncConfig) -> ClientResult<Self> {
        let engine = SyncEngine::handshake(channel, ClientKind::Rpc, config).map_err(connection_error)?;
        Ok(Self { engine })
    }
}

impl private::Sealed for RpcClient {
    fn engine(&self) -> &SyncEngine {
        &self.engine
    }
}

impl Client for RpcClient {
    fn kind(&self) -> ClientKind {
        ClientKind::Rpc
    }
}

/// Any failure during the handshake leaves no usable client.
fn connection_error(e: shmeta_sync::SyncError) -> ClientError {
    ClientError::Connection(e.message())
}

use std::future::Future;
use std::io::ErrorKind as IoErrorKind;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use shmeta_protocol::{MetaCodec, Request};
use shmeta_store::{Cluster, ClusterConfig, Session, StoreInstance};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::ServerResult;

/// shmeta daemon, before its listeners are bound.
pub struct MetaServer {
    config: ServerConfig,
    cluster: Arc<Cluster>,
}

impl MetaServer {
    /// A server whose instance forms a cluster of its own.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_cluster(config, Cluster::new(ClusterConfig::default()))
    }

    /// A server whose instance joins `cluster`.
    pub fn with_cluster(config: ServerConfig, cluster: Arc<Cluster>) -> Self {
        Self { config, cluster }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind both listeners and join the cluster.
    ///
    /// A stale socket file left at the IPC path is replaced. The instance
    /// reports the TCP address actually bound, so port 0 works.
    pub async fn bind(self) -> ServerResult<BoundServer> {
        let path = &self.config.ipc_socket;
        if path.exists() {
            warn!(socket = %path.display(), "removing stale socket");
            std::fs::remove_file(path)?;
        }
        let unix = UnixListener::bind(path)?;
        let tcp = TcpListener::bind(self.config.rpc_addr).await?;
        let rpc_addr = tcp.local_addr()?;

        let mut store_config = self.config.store_config();
        store_config.rpc_endpoint = rpc_addr.to_string();
        let instance = StoreInstance::join(&self.cluster, store_config)?;
        info!(
            instance = %instance.instance_id(),
            socket = %path.display(),
            %rpc_addr,
            "shmeta server listening"
        );

        Ok(BoundServer {
            permits: Arc::new(Semaphore::new(self.config.max_connections)),
            ipc_socket: path.clone(),
            rpc_addr,
            unix,
            tcp,
            instance,
        })
    }

    /// Bind and serve until Ctrl-C.
    pub async fn serve(self) -> ServerResult<()> {
        self.bind().await?.run_until(shutdown_signal()).await
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for ctrl-c; serving until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

/// A server with bound listeners, ready to accept.
pub struct BoundServer {
    permits: Arc<Semaphore>,
    ipc_socket: PathBuf,
    rpc_addr: SocketAddr,
    unix: UnixListener,
    tcp: TcpListener,
    instance: Arc<StoreInstance>,
}

impl BoundServer {
    pub fn ipc_socket(&self) -> &Path {
        &self.ipc_socket
    }

    pub fn rpc_addr(&self) -> SocketAddr {
        self.rpc_addr
    }

    pub fn instance(&self) -> &Arc<StoreInstance> {
        &self.instance
    }

    /// Accept clients until `shutdown` resolves, then leave the cluster and
    /// remove the socket file. Open connections fail on their next request.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> ServerResult<()> {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.unix.accept() => match accepted {
                    Ok((stream, _)) => self.spawn_session(stream, "ipc".to_string()),
                    Err(e) => warn!(error = %e, "ipc accept failed"),
                },
                accepted = self.tcp.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(%peer, error = %e, "cannot set nodelay");
                        }
                        self.spawn_session(stream, peer.to_string());
                    }
                    Err(e) => warn!(error = %e, "rpc accept failed"),
                },
            }
        }

        self.instance.shutdown();
        if let Err(e) = std::fs::remove_file(&self.ipc_socket) {
            debug!(socket = %self.ipc_socket.display(), error = %e, "socket already gone");
        }
        info!(instance = %self.instance.instance_id(), "shmeta server stopped");
        Ok(())
    }

    fn spawn_session<S>(&self, stream: S, peer: String)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            warn!(%peer, "connection limit reached, rejecting");
            return;
        };
        let instance = Arc::clone(&self.instance);
        tokio::spawn(async move {
            let _permit = permit;
            debug!(%peer, "connection accepted");
            match serve_connection(stream, instance).await {
                Ok(()) => debug!(%peer, "connection closed"),
                Err(e) => warn!(%peer, error = %e, "connection failed"),
            }
        });
    }
}

/// Answer frames from one client until it exits or hangs up.
async fn serve_connection<S>(mut stream: S, instance: Arc<StoreInstance>) -> ServerResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut session = Session::new(instance);
    loop {
        let mut header = [0u8; 4];
        match stream.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == IoErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        let len = MetaCodec::body_len(header)?;
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await?;
        let request: Request = MetaCodec::decode_body(&body)?;

        let response = session.handle(&request);
        let frame = MetaCodec::encode(&response)?;
        stream.write_all(&frame).await?;

        if matches!(request, Request::Exit) {
            return Ok(());
        }
    }
}

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
#[cfg(unix)]
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::codec::MetaCodec;
use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{Request, Response};

/// Breaks a channel from outside the lock that serializes its calls.
///
/// A call blocked on a silent peer returns with a transport error as soon as
/// the channel is interrupted.
pub trait Interrupt: Send + Sync {
    fn interrupt(&self);
}

/// A connected, ordered, reliable request/response channel to one store
/// instance.
///
/// Channels are established outside the synchronization engine and handed
/// to it already connected. Once a call fails at the transport level the
/// channel must report itself closed; it is never reopened.
pub trait Channel: Send {
    /// Send `request` and wait for its response.
    ///
    /// An instance-side failure comes back as `Ok(Response::Error { .. })`;
    /// `Err` is reserved for transport failures.
    fn call(&mut self, request: &Request) -> ProtocolResult<Response>;

    /// Whether the channel can still carry requests.
    fn is_open(&self) -> bool;

    /// Release the underlying resources. Idempotent.
    fn close(&mut self);

    /// Bound how long subsequent calls may block on the peer. `None` blocks
    /// until the peer answers or hangs up. A call that runs out of time
    /// fails and closes the channel.
    fn set_timeout(&mut self, timeout: Option<Duration>) -> ProtocolResult<()> {
        let _ = timeout;
        Ok(())
    }

    /// A handle that breaks this channel while a call is in flight. Channels
    /// whose calls never block on a peer return `None`.
    fn interrupter(&self) -> Option<Arc<dyn Interrupt>> {
        None
    }
}

impl<C: Channel + ?Sized> Channel for Box<C> {
    fn call(&mut self, request: &Request) -> ProtocolResult<Response> {
        (**self).call(request)
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> ProtocolResult<()> {
        (**self).set_timeout(timeout)
    }

    fn interrupter(&self) -> Option<Arc<dyn Interrupt>> {
        (**self).interrupter()
    }
}

/// A blocking socket a [`StreamChannel`] can run on.
pub trait Transport: Read + Write + Interrupt {
    /// Apply `timeout` to both reads and writes.
    fn set_io_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// A second handle to the same socket, used to shut it down.
    fn shutdown_handle(&self) -> io::Result<Arc<dyn Interrupt>>;
}

impl Interrupt for TcpStream {
    fn interrupt(&self) {
        if let Err(e) = self.shutdown(Shutdown::Both) {
            debug!(error = %e, "socket already shut down");
        }
    }
}

impl Transport for TcpStream {
    fn set_io_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }

    fn shutdown_handle(&self) -> io::Result<Arc<dyn Interrupt>> {
        Ok(Arc::new(self.try_clone()?))
    }
}

#[cfg(unix)]
impl Interrupt for UnixStream {
    fn interrupt(&self) {
        if let Err(e) = self.shutdown(Shutdown::Both) {
            debug!(error = %e, "socket already shut down");
        }
    }
}

#[cfg(unix)]
impl Transport for UnixStream {
    fn set_io_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }

    fn shutdown_handle(&self) -> io::Result<Arc<dyn Interrupt>> {
        Ok(Arc::new(self.try_clone()?))
    }
}

/// Channel over a blocking socket, using [`MetaCodec`] framing.
pub struct StreamChannel<S> {
    stream: Option<S>,
    peer: String,
}

impl<S: Transport> StreamChannel<S> {
    /// Wrap an already connected stream. `peer` is used in logs only.
    pub fn new(stream: S, peer: impl Into<String>) -> Self {
        Self {
            stream: Some(stream),
            peer: peer.into(),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}

#[cfg(unix)]
impl StreamChannel<UnixStream> {
    /// Connect to an instance's local socket.
    pub fn connect_ipc(path: &Path) -> ProtocolResult<Self> {
        let stream = UnixStream::connect(path)?;
        Ok(Self::new(stream, path.display().to_string()))
    }
}

impl StreamChannel<TcpStream> {
    /// Connect to an instance's RPC endpoint (`host:port`).
    pub fn connect_rpc(addr: &str) -> ProtocolResult<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream, addr))
    }
}

impl<S: Transport> Channel for StreamChannel<S> {
    fn call(&mut self, request: &Request) -> ProtocolResult<Response> {
        let stream = self.stream.as_mut().ok_or(ProtocolError::Disconnected)?;
        let result = MetaCodec::write_frame(stream, request)
            .and_then(|()| MetaCodec::read_frame::<_, Response>(stream));
        if let Err(e) = &result {
            debug!(peer = %self.peer, request = request.type_name(), error = %e, "channel failed, closing");
            self.stream = None;
        }
        result
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            // handles from `interrupter` keep the socket open past this drop
            stream.interrupt();
            debug!(peer = %self.peer, "channel closed");
        }
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> ProtocolResult<()> {
        let Some(stream) = self.stream.as_ref() else {
            return Ok(());
        };
        // a zero timeout is rejected by the socket layer
        let timeout = timeout.map(|t| t.max(Duration::from_millis(1)));
        stream.set_io_timeout(timeout)?;
        Ok(())
    }

    fn interrupter(&self) -> Option<Arc<dyn Interrupt>> {
        let stream = self.stream.as_ref()?;
        match stream.shutdown_handle() {
            Ok(handle) => Some(handle),
            Err(e) => {
                debug!(peer = %self.peer, error = %e, "no shutdown handle");
                None
            }
        }
    }
}

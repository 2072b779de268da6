//! Plain TCP transport

use super::resolve::{Resolve, SystemResolver};
use super::{is_transient, raw_descriptor, MsgFlags, RawDescriptor, Socket};
use crate::metrics::{self, labels};
use crate::{Error, ErrorCode, Result};
use socket2::{Domain, Protocol, SockAddr, Type};
use std::io::{self, IoSlice, Read};
use std::mem::MaybeUninit;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;

/// Unencrypted TCP socket
pub struct TcpSocket {
    socket: Option<socket2::Socket>,
    resolver: Arc<dyn Resolve>,
    last_error: Option<ErrorCode>,
}

impl std::fmt::Debug for TcpSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpSocket")
            .field("descriptor", &self.descriptor())
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl Default for TcpSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpSocket {
    /// Unopened socket using the system resolver
    pub fn new() -> Self {
        Self::with_resolver(Arc::new(SystemResolver))
    }

    /// Unopened socket using `resolver`
    pub fn with_resolver(resolver: Arc<dyn Resolve>) -> Self {
        Self {
            socket: None,
            resolver,
            last_error: None,
        }
    }

    /// Adopt an already-connected OS socket
    pub fn from_socket(socket: socket2::Socket) -> Self {
        let mut tcp = Self::new();
        tcp.socket = Some(socket);
        tcp
    }

    /// Adopt an already-connected stream
    pub fn from_stream(stream: TcpStream) -> Self {
        Self::from_socket(socket2::Socket::from(stream))
    }

    fn record(&mut self, err: Error) -> Error {
        self.last_error = Some(err.code());
        err
    }

    fn settle(&mut self, result: io::Result<usize>, direction: &'static str) -> Result<usize> {
        match result {
            Ok(n) => Ok(n),
            Err(e) if is_transient(&e) => {
                metrics::counters::transient_retry(labels::TRANSPORT_TCP, direction);
                Ok(0)
            }
            Err(e) => Err(self.record(e.into())),
        }
    }
}

impl Socket for TcpSocket {
    fn open(&mut self, host: &str, port: u16) -> Result<()> {
        match connect(self.resolver.as_ref(), host, port) {
            Ok(socket) => {
                self.socket = Some(socket);
                self.last_error = None;
                metrics::counters::socket_opened(labels::TRANSPORT_TCP);
                Ok(())
            }
            Err(e) => {
                metrics::counters::socket_open_failed(labels::TRANSPORT_TCP, e.category());
                Err(self.record(e))
            }
        }
    }

    fn send(&mut self, buf: &[u8], flags: MsgFlags) -> Result<usize> {
        self.last_error = None;
        let Some(socket) = self.socket.as_ref() else {
            return Err(self.record(Error::NotConnected));
        };
        let result = socket.send_with_flags(buf, flags);
        self.settle(result, labels::DIRECTION_SEND)
    }

    fn recv(&mut self, buf: &mut [u8], flags: MsgFlags) -> Result<usize> {
        self.last_error = None;
        let Some(mut socket) = self.socket.as_ref() else {
            return Err(self.record(Error::NotConnected));
        };
        let result = if flags == 0 {
            socket.read(buf)
        } else {
            // SAFETY: `recv` only ever writes initialized bytes into the slice and
            // never reads from it, so viewing `[u8]` as `[MaybeUninit<u8>]` is sound.
            let uninit = unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) };
            socket.recv_with_flags(uninit, flags)
        };
        self.settle(result, labels::DIRECTION_RECV)
    }

    fn writev(&mut self, bufs: &[IoSlice<'_>]) -> Result<usize> {
        self.last_error = None;
        let Some(socket) = self.socket.as_ref() else {
            return Err(self.record(Error::NotConnected));
        };
        let result = socket.send_vectored(bufs);
        self.settle(result, labels::DIRECTION_SEND)
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        let Some(socket) = self.socket.take() else {
            return Ok(());
        };
        match socket.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn last_error(&self) -> Option<ErrorCode> {
        self.last_error.or_else(|| {
            let pending = self.socket.as_ref()?.take_error().ok().flatten()?;
            Some(ErrorCode::Os(pending.raw_os_error().unwrap_or(-1)))
        })
    }

    fn descriptor(&self) -> Option<RawDescriptor> {
        self.socket.as_ref().map(raw_descriptor)
    }

    fn is_tls(&self) -> bool {
        false
    }
}

/// Resolve `host` and connect to the first address that accepts, with
/// Nagle's algorithm disabled
pub(crate) fn connect(resolver: &dyn Resolve, host: &str, port: u16) -> Result<socket2::Socket> {
    let addrs = resolver.resolve(host, port)?;

    let mut last_err = None;
    for addr in addrs {
        match connect_addr(addr) {
            Ok(socket) => {
                tracing::debug!(host, %addr, "established tcp connection");
                return Ok(socket);
            }
            Err(e) => {
                tracing::debug!(host, %addr, error = %e, "tcp connect attempt failed");
                last_err = Some(e);
            }
        }
    }

    Err(match last_err {
        Some(e) => Error::Io(e),
        None => Error::NoAddress(host.to_string()),
    })
}

/// The socket is dropped, and so closed, on any failure
fn connect_addr(addr: SocketAddr) -> io::Result<socket2::Socket> {
    let socket = socket2::Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nodelay(true)?;
    socket.connect(&SockAddr::from(addr))?;
    Ok(socket)
}

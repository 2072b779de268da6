//! Socket transports
//!
//! This module handles:
//! * The [`Socket`] trait every transport implements
//! * Plain TCP ([`TcpSocket`]) and TLS over TCP ([`TlsSocket`])
//! * Host name resolution, write coalescing and certificate hostname checks
//! * TLS configuration

mod buffer;
mod config;
mod resolve;
mod tcp;
mod tls;
mod verify;

pub use buffer::CoalesceBuffer;
pub use config::{TlsConfig, TlsConfigBuilder};
pub use resolve::{Resolve, StaticResolver, SystemResolver};
pub use tcp::TcpSocket;
pub use tls::TlsSocket;
pub use verify::{common_name_matches, peer_common_name, verify_peer_hostname, MAX_COMMON_NAME_LEN};

use crate::{ErrorCode, Result};
use std::io::{self, IoSlice};

/// Flags passed through to `send(2)` / `recv(2)`
pub type MsgFlags = std::ffi::c_int;

/// Platform socket handle
#[cfg(unix)]
pub type RawDescriptor = std::os::unix::io::RawFd;

/// Platform socket handle
#[cfg(windows)]
pub type RawDescriptor = std::os::windows::io::RawSocket;

/// Byte transport used by the protocol engine.
///
/// `send`, `recv` and `writev` return `Ok(n)` for bytes moved, `Ok(0)` when
/// nothing moved and the call should be retried later, and `Err` for fatal
/// errors. A `recv` of `Ok(0)` also covers an orderly shutdown by the peer.
pub trait Socket: Send + std::fmt::Debug {
    /// Connect to `host:port` (and handshake, for TLS)
    fn open(&mut self, host: &str, port: u16) -> Result<()>;

    /// Write once from `buf`
    fn send(&mut self, buf: &[u8], flags: MsgFlags) -> Result<usize>;

    /// Read once into `buf`
    fn recv(&mut self, buf: &mut [u8], flags: MsgFlags) -> Result<usize>;

    /// Write all of `bufs`, in order, as one send
    fn writev(&mut self, bufs: &[IoSlice<'_>]) -> Result<usize>;

    /// Release everything the socket owns
    fn close(self: Box<Self>) -> Result<()>;

    /// Best-effort last error, for diagnostics
    fn last_error(&self) -> Option<ErrorCode>;

    /// OS descriptor, for external readiness polling; `None` until opened
    fn descriptor(&self) -> Option<RawDescriptor>;

    /// Whether this transport encrypts
    fn is_tls(&self) -> bool;
}

/// "No progress, retry later" conditions
pub(crate) fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

pub(crate) fn raw_descriptor(socket: &socket2::Socket) -> RawDescriptor {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        socket.as_raw_fd()
    }
    #[cfg(windows)]
    {
        use std::os::windows::io::AsRawSocket;
        socket.as_raw_socket()
    }
}

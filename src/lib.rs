//! amqp-transport: pluggable socket transport for messaging-protocol clients
//!
//! This crate provides the byte-level transport a protocol engine talks to:
//!
//! * A uniform [`Socket`] trait with two backends: plain TCP ([`TcpSocket`])
//!   and TLS over TCP ([`TlsSocket`])
//! * Certificate hostname verification against the peer's subject common name
//! * Process-wide, reference-counted lifecycle management of the TLS engine,
//!   including lock-slot callback wiring
//!
//! Sockets are blocking. `send`/`recv` return `Ok(0)` for transient "try again"
//! conditions and `Err` for fatal ones, so callers can tell the two apart.
//!
//! # Examples
//!
//! ```no_run
//! use amqp_transport::{Socket, TlsConfig, TlsSocket};
//!
//! # fn example() -> amqp_transport::Result<()> {
//! let config = TlsConfig::builder()
//!     .ca_cert_path("/etc/rabbitmq/ca.pem")
//!     .build();
//!
//! let mut socket: Box<dyn Socket> = Box::new(TlsSocket::connect("broker.internal", 5671, &config)?);
//! socket.send(b"AMQP\x00\x00\x09\x01", 0)?;
//! socket.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod error;
pub mod metrics;
pub mod socket;

pub use engine::{lifecycle, set_initialize_tls_engine};
pub use error::{Error, ErrorCode, Result};
pub use socket::{
    common_name_matches, verify_peer_hostname, CoalesceBuffer, MsgFlags, RawDescriptor, Resolve,
    Socket, StaticResolver, SystemResolver, TcpSocket, TlsConfig, TlsConfigBuilder, TlsSocket,
};

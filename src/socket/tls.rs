//! TLS over TCP transport

use super::buffer::CoalesceBuffer;
use super::config::TlsConfig;
use super::resolve::{Resolve, SystemResolver};
use super::verify::{verify_peer_hostname, ChainRecorder, ChainVerdict};
use super::{is_transient, raw_descriptor, tcp, MsgFlags, RawDescriptor, Socket};
use crate::engine::{self, LifecycleLease, RustlsEngine};
use crate::metrics::{self, labels};
use crate::{Error, ErrorCode, Result};
use rustls::crypto::CryptoProvider;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use sha2::{Digest, Sha256};
use std::io::{self, IoSlice, Read, Write};
use std::net::Shutdown;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

type TlsStream = StreamOwned<ClientConnection, socket2::Socket>;

/// Per-socket TLS settings, built at construction and applied at open
struct TlsContext {
    provider: Arc<CryptoProvider>,
    /// Custom trust roots; the engine's system roots when unset
    roots: Option<Arc<RootCertStore>>,
    identity: Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>,
}

impl TlsContext {
    fn new(provider: Arc<CryptoProvider>) -> Result<Self> {
        // fail early if the provider cannot produce a client config at all
        let _ = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?;
        Ok(Self {
            provider,
            roots: None,
            identity: None,
        })
    }

    fn client_config(&self, verifier: Arc<ChainRecorder>) -> Result<ClientConfig> {
        let builder = ClientConfig::builder_with_provider(self.provider.clone())
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(verifier);

        let config = match &self.identity {
            Some((certs, key)) => builder.with_client_auth_cert(certs.clone(), key.clone_key())?,
            None => builder.with_no_client_auth(),
        };
        Ok(config)
    }
}

/// TLS socket backed by rustls.
///
/// Every instance holds a reference on the process-wide TLS engine lifecycle
/// from construction until it is closed or dropped.
///
/// # Examples
///
/// ```no_run
/// use amqp_transport::{Socket, TlsSocket};
///
/// let mut socket = TlsSocket::new()?;
/// socket.set_ca_cert("/etc/rabbitmq/ca.pem")?;
/// socket.open("broker.example.com", 5671)?;
/// socket.send(b"AMQP\x00\x00\x09\x01", 0)?;
/// # Ok::<(), amqp_transport::Error>(())
/// ```
pub struct TlsSocket {
    context: TlsContext,
    stream: Option<TlsStream>,
    buffer: CoalesceBuffer,
    verify: bool,
    resolver: Arc<dyn Resolve>,
    last_error: Option<ErrorCode>,
    // dropped last, after the connection
    lease: LifecycleLease<'static, RustlsEngine>,
}

impl std::fmt::Debug for TlsSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSocket")
            .field("descriptor", &self.descriptor())
            .field("verify", &self.verify)
            .field("custom_roots", &self.context.roots.is_some())
            .field("client_identity", &self.context.identity.is_some())
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl TlsSocket {
    /// Unopened socket using the system resolver
    pub fn new() -> Result<Self> {
        Self::with_resolver(Arc::new(SystemResolver))
    }

    /// Unopened socket using `resolver`
    pub fn with_resolver(resolver: Arc<dyn Resolve>) -> Result<Self> {
        let lease = engine::lifecycle().acquire()?;
        let context = TlsContext::new(lease.engine().provider())?;

        Ok(Self {
            context,
            stream: None,
            buffer: CoalesceBuffer::new(),
            verify: true,
            resolver,
            last_error: None,
            lease,
        })
    }

    /// Unopened socket configured from `config`
    pub fn from_config(config: &TlsConfig) -> Result<Self> {
        let mut socket = Self::new()?;
        socket.apply_config(config)?;
        Ok(socket)
    }

    /// Construct, configure and open in one step
    pub fn connect(host: &str, port: u16, config: &TlsConfig) -> Result<Self> {
        let mut socket = Self::from_config(config)?;
        socket.open(host, port)?;
        Ok(socket)
    }

    /// Apply every setting in `config`
    pub fn apply_config(&mut self, config: &TlsConfig) -> Result<()> {
        let identity = config.client_identity()?;
        if let Some(path) = config.ca_cert_path() {
            self.set_ca_cert(path)?;
        }
        if let Some((cert, key)) = identity {
            self.set_client_identity(cert, key)?;
        }
        self.set_verify(config.verify_hostname());
        Ok(())
    }

    /// Trust only the CA certificates in the PEM file at `path`
    pub fn set_ca_cert(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let pem = read_pem(path, "CA certificate")?;

        let mut store = RootCertStore::empty();
        for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
            let cert = cert.map_err(|e| {
                Error::Config(format!(
                    "failed to parse CA certificate from '{}': {}",
                    path.display(),
                    e
                ))
            })?;
            store.add(cert).map_err(|e| {
                Error::Config(format!(
                    "unusable CA certificate in '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }

        if store.is_empty() {
            return Err(Error::Config(format!(
                "no valid certificates found in '{}'",
                path.display()
            )));
        }

        tracing::debug!(path = %path.display(), certs = store.len(), "loaded CA certificates");
        self.context.roots = Some(Arc::new(store));
        Ok(())
    }

    /// Present the PEM certificate chain at `cert_path` with the PEM private
    /// key at `key_path` when the server asks for a client certificate
    pub fn set_client_identity(
        &mut self,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<()> {
        let (cert_path, key_path) = (cert_path.as_ref(), key_path.as_ref());

        let pem = read_pem(cert_path, "client certificate")?;
        let certs = rustls_pemfile::certs(&mut pem.as_slice())
            .collect::<io::Result<Vec<_>>>()
            .map_err(|e| {
                Error::Config(format!(
                    "failed to parse client certificate from '{}': {}",
                    cert_path.display(),
                    e
                ))
            })?;
        if certs.is_empty() {
            return Err(Error::Config(format!(
                "no valid certificates found in '{}'",
                cert_path.display()
            )));
        }

        let pem = read_pem(key_path, "client key")?;
        let key = rustls_pemfile::private_key(&mut pem.as_slice())
            .map_err(|e| {
                Error::Config(format!(
                    "failed to parse client key from '{}': {}",
                    key_path.display(),
                    e
                ))
            })?
            .ok_or_else(|| {
                Error::Config(format!("no private key found in '{}'", key_path.display()))
            })?;

        self.context
            .provider
            .key_provider
            .load_private_key(key.clone_key())?;

        tracing::debug!(
            cert = %cert_path.display(),
            key = %key_path.display(),
            chain = certs.len(),
            "loaded client identity"
        );
        self.context.identity = Some((certs, key));
        Ok(())
    }

    /// Enable or disable the common name check on open (default: enabled).
    ///
    /// The certificate chain is validated either way.
    pub fn set_verify(&mut self, verify: bool) {
        self.verify = verify;
    }

    /// Sockets always block; only `true` is supported
    pub fn set_blocking(&mut self, blocking: bool) -> Result<()> {
        if blocking {
            Ok(())
        } else {
            Err(Error::Unsupported("non-blocking tls sockets"))
        }
    }

    /// SHA-256 of the peer's leaf certificate, once open
    pub fn peer_fingerprint(&self) -> Option<[u8; 32]> {
        let stream = self.stream.as_ref()?;
        let leaf = stream.conn.peer_certificates()?.first()?;
        Some(Sha256::digest(&leaf[..]).into())
    }

    fn record(&mut self, err: Error) -> Error {
        self.last_error = Some(err.code());
        err
    }

    fn settle(&mut self, result: io::Result<usize>, direction: &'static str) -> Result<usize> {
        match result {
            Ok(n) => Ok(n),
            Err(e) if is_transient(&e) => {
                metrics::counters::transient_retry(labels::TRANSPORT_TLS, direction);
                Ok(0)
            }
            Err(e) => Err(self.record(classify(e))),
        }
    }

    fn handshake(&self, host: &str, port: u16) -> Result<TlsStream> {
        if self.stream.is_some() {
            return Err(Error::Config("tls socket is already open".to_string()));
        }

        let roots = match &self.context.roots {
            Some(roots) => roots.clone(),
            None => self.lease.engine().system_roots(),
        };
        let recorder = Arc::new(ChainRecorder::new(roots, self.context.provider.clone()));
        let config = self.context.client_config(recorder.clone())?;

        let server_name = ServerName::try_from(host.trim_end_matches('.').to_string())
            .map_err(|e| Error::Config(format!("invalid hostname for TLS '{}': {}", host, e)))?;
        let mut conn = ClientConnection::new(Arc::new(config), server_name)?;
        // a blocking send queues the whole frame, however large
        conn.set_buffer_limit(None);

        let socket = tcp::connect(self.resolver.as_ref(), host, port)?;
        let mut stream = StreamOwned::new(conn, socket);

        let started = Instant::now();
        while stream.conn.is_handshaking() {
            stream.conn.complete_io(&mut stream.sock).map_err(classify)?;
        }
        metrics::histograms::handshake_duration(started.elapsed());

        match recorder.verdict() {
            Some(ChainVerdict::Valid) => {}
            Some(ChainVerdict::Invalid(reason)) => return Err(Error::CertificateChain(reason)),
            None => {
                return Err(Error::CertificateChain(
                    "server presented no certificate".to_string(),
                ))
            }
        }

        if self.verify {
            let matches = stream
                .conn
                .peer_certificates()
                .and_then(|certs| certs.first())
                .map_or(false, |leaf| verify_peer_hostname(leaf, host));
            if !matches {
                return Err(Error::HostnameMismatch {
                    host: host.to_string(),
                });
            }
        }

        Ok(stream)
    }
}

impl Socket for TlsSocket {
    fn open(&mut self, host: &str, port: u16) -> Result<()> {
        let span = tracing::info_span!("tls_open", host, port);
        let _enter = span.enter();

        match self.handshake(host, port) {
            Ok(stream) => {
                tracing::info!(
                    protocol = ?stream.conn.protocol_version(),
                    cipher_suite = ?stream.conn.negotiated_cipher_suite().map(|s| s.suite()),
                    "tls connection established"
                );
                self.stream = Some(stream);
                self.last_error = None;
                if let Some(fingerprint) = self.peer_fingerprint() {
                    tracing::debug!(fingerprint = %format_fingerprint(&fingerprint), "peer certificate");
                }
                metrics::counters::socket_opened(labels::TRANSPORT_TLS);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "tls open failed");
                metrics::counters::socket_open_failed(labels::TRANSPORT_TLS, e.category());
                if e.code().is_verification() {
                    metrics::counters::verification_failed(e.category());
                }
                Err(self.record(e))
            }
        }
    }

    /// `flags` have no meaning for TLS records and are ignored
    fn send(&mut self, buf: &[u8], _flags: MsgFlags) -> Result<usize> {
        self.last_error = None;
        let Some(stream) = self.stream.as_mut() else {
            return Err(self.record(Error::NotConnected));
        };

        let result = stream.write(buf).and_then(|n| match stream.flush() {
            // the records stay queued and go out with the next write
            Err(e) if is_transient(&e) => Ok(n),
            other => other.map(|()| n),
        });
        self.settle(result, labels::DIRECTION_SEND)
    }

    /// `flags` have no meaning for TLS records and are ignored
    fn recv(&mut self, buf: &mut [u8], _flags: MsgFlags) -> Result<usize> {
        self.last_error = None;
        let Some(stream) = self.stream.as_mut() else {
            return Err(self.record(Error::NotConnected));
        };

        // Ok(0) here also covers a clean close_notify from the peer
        let result = stream.read(buf);
        self.settle(result, labels::DIRECTION_RECV)
    }

    fn writev(&mut self, bufs: &[IoSlice<'_>]) -> Result<usize> {
        let mut buffer = std::mem::take(&mut self.buffer);
        let result = match buffer.coalesce(bufs) {
            Ok(data) => self.send(data, 0),
            Err(e) => Err(self.record(e)),
        };
        self.buffer = buffer;
        result
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.conn.send_close_notify();
            while stream.conn.wants_write() {
                match stream.conn.write_tls(&mut stream.sock) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(error = %e, "failed to send close_notify");
                        break;
                    }
                }
            }
            if let Err(e) = stream.sock.shutdown(Shutdown::Both) {
                tracing::debug!(error = %e, "tls socket shutdown failed");
            }
        }
        tracing::debug!("tls socket closed");
        Ok(())
    }

    fn last_error(&self) -> Option<ErrorCode> {
        self.last_error
    }

    fn descriptor(&self) -> Option<RawDescriptor> {
        self.stream.as_ref().map(|stream| raw_descriptor(&stream.sock))
    }

    fn is_tls(&self) -> bool {
        true
    }
}

fn read_pem(path: &Path, what: &str) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        Error::Config(format!(
            "failed to read {} file '{}': {}",
            what,
            path.display(),
            e
        ))
    })
}

/// Surface TLS protocol faults carried inside an `io::Error` as [`Error::Tls`]
fn classify(err: io::Error) -> Error {
    match err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
    {
        Some(tls) => Error::Tls(tls.clone()),
        None => Error::Io(err),
    }
}

fn format_fingerprint(digest: &[u8]) -> String {
    digest
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

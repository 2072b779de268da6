//! Integration tests for the TLS transport
//!
//! Each test mints a throwaway CA with rcgen, starts a rustls server on a
//! loopback port in a background thread and drives a [`TlsSocket`] against it.
//! Host names are pinned to 127.0.0.1 with a [`StaticResolver`].
//!
//! ```bash
//! RUST_LOG=amqp_transport=debug cargo test --test tls_integration -- --nocapture
//! ```

use amqp_transport::{Error, ErrorCode, Socket, StaticResolver, TlsConfig, TlsSocket};
use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig, ServerConnection, StreamOwned};
use std::io::{IoSlice, Read, Write};
use std::net::{Ipv4Addr, TcpListener};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

/// A CA plus the temp directory its PEM files live in
struct Pki {
    ca: rcgen::Certificate,
    ca_key: KeyPair,
    dir: TempDir,
}

/// Certificate and key issued by a [`Pki`]
struct Identity {
    cert: CertificateDer<'static>,
    key: PrivateKeyDer<'static>,
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl Pki {
    fn new() -> Self {
        let ca_key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.distinguished_name = DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, "Test Broker CA");
        let ca = params.self_signed(&ca_key).unwrap();

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ca.pem"), ca.pem()).unwrap();
        Self { ca, ca_key, dir }
    }

    fn ca_path(&self) -> PathBuf {
        self.dir.path().join("ca.pem")
    }

    fn roots(&self) -> RootCertStore {
        let mut roots = RootCertStore::empty();
        roots.add(self.ca.der().clone()).unwrap();
        roots
    }

    fn issue(&self, common_name: &str) -> Identity {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(vec![common_name.to_string()]).unwrap();
        params.distinguished_name = DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, common_name);
        let cert = params.signed_by(&key, &self.ca, &self.ca_key).unwrap();

        let cert_path = self.dir.path().join(format!("{}.pem", common_name));
        let key_path = self.dir.path().join(format!("{}.key", common_name));
        std::fs::write(&cert_path, cert.pem()).unwrap();
        std::fs::write(&key_path, key.serialize_pem()).unwrap();

        Identity {
            cert: cert.der().clone(),
            key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der())),
            cert_path,
            key_path,
        }
    }
}

fn server_config(identity: &Identity, client_roots: Option<RootCertStore>) -> Arc<ServerConfig> {
    let builder = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .unwrap();
    let builder = match client_roots {
        Some(roots) => builder.with_client_cert_verifier(
            WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider())
                .build()
                .unwrap(),
        ),
        None => builder.with_no_client_auth(),
    };
    Arc::new(
        builder
            .with_single_cert(vec![identity.cert.clone()], identity.key.clone_key())
            .unwrap(),
    )
}

/// Accept one connection and echo until the client closes. Receiving
/// `close` makes the server send close_notify instead.
fn spawn_server(identity: &Identity, client_roots: Option<RootCertStore>) -> (u16, JoinHandle<()>) {
    let config = server_config(identity, client_roots);
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = std::thread::spawn(move || {
        let (tcp, _) = listener.accept().unwrap();
        let conn = ServerConnection::new(config).unwrap();
        let mut stream = StreamOwned::new(conn, tcp);
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) if &buf[..n] == b"close" => {
                    stream.conn.send_close_notify();
                    let _ = stream.flush();
                    // drain until the client goes away
                    while matches!(stream.read(&mut buf), Ok(n) if n > 0) {}
                    break;
                }
                Ok(n) => {
                    if stream.write_all(&buf[..n]).and_then(|_| stream.flush()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    (port, handle)
}

/// Accept one connection and collect everything the client sends before it
/// closes
fn spawn_sink(identity: &Identity) -> (u16, JoinHandle<Vec<u8>>) {
    let config = server_config(identity, None);
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = std::thread::spawn(move || {
        let (tcp, _) = listener.accept().unwrap();
        let conn = ServerConnection::new(config).unwrap();
        let mut stream = StreamOwned::new(conn, tcp);
        let mut received = Vec::new();
        let mut buf = [0u8; 16 * 1024];
        while let Ok(n) = stream.read(&mut buf) {
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }
        received
    });

    (port, handle)
}

fn cluster_resolver() -> Arc<StaticResolver> {
    Arc::new(
        StaticResolver::new()
            .with_host("node1.cluster.internal", Ipv4Addr::LOCALHOST.into())
            .with_host("node2.cluster.internal", Ipv4Addr::LOCALHOST.into()),
    )
}

fn socket_trusting(pki: &Pki) -> TlsSocket {
    let mut socket = TlsSocket::with_resolver(cluster_resolver()).unwrap();
    socket.set_ca_cert(pki.ca_path()).unwrap();
    socket
}

fn recv_exact(socket: &mut dyn Socket, len: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 1024];
    while out.len() < len {
        let n = socket.recv(&mut buf, 0).unwrap();
        assert!(n > 0, "peer closed early");
        out.extend_from_slice(&buf[..n]);
    }
    out
}

#[test]
fn test_open_matching_host_succeeds() {
    init_tracing();
    let pki = Pki::new();
    let (port, server) = spawn_server(&pki.issue("node1.cluster.internal"), None);

    let mut socket = socket_trusting(&pki);
    socket.open("node1.cluster.internal", port).unwrap();
    assert!(socket.descriptor().is_some());
    assert!(socket.last_error().is_none());
    assert!(socket.peer_fingerprint().is_some());

    Box::new(socket).close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_open_host_is_case_insensitive() {
    init_tracing();
    let pki = Pki::new();
    let (port, server) = spawn_server(&pki.issue("node1.cluster.internal"), None);

    let mut socket = socket_trusting(&pki);
    socket.open("NODE1.Cluster.Internal", port).unwrap();

    Box::new(socket).close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_open_mismatched_host_fails_verification() {
    init_tracing();
    let pki = Pki::new();
    let (port, server) = spawn_server(&pki.issue("node1.cluster.internal"), None);

    let mut socket = socket_trusting(&pki);
    let err = socket.open("node2.cluster.internal", port).unwrap_err();
    assert!(matches!(err, Error::HostnameMismatch { ref host } if host == "node2.cluster.internal"));
    assert_eq!(socket.last_error(), Some(ErrorCode::HostnameVerification));
    assert!(socket.last_error().unwrap().is_verification());
    assert!(socket.descriptor().is_none());

    Box::new(socket).close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_open_without_verify_skips_hostname() {
    init_tracing();
    let pki = Pki::new();
    let (port, server) = spawn_server(&pki.issue("node1.cluster.internal"), None);

    let mut socket = socket_trusting(&pki);
    socket.set_verify(false);
    socket.open("node2.cluster.internal", port).unwrap();

    Box::new(socket).close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_open_untrusted_ca_fails_chain() {
    init_tracing();
    let trusted = Pki::new();
    let rogue = Pki::new();
    let (port, server) = spawn_server(&rogue.issue("node1.cluster.internal"), None);

    // hostname checks are off, the chain is still validated
    let mut socket = socket_trusting(&trusted);
    socket.set_verify(false);
    let err = socket.open("node1.cluster.internal", port).unwrap_err();
    assert!(matches!(err, Error::CertificateChain(_)));
    assert_eq!(socket.last_error(), Some(ErrorCode::CertificateChain));

    Box::new(socket).close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_send_recv_echo() {
    init_tracing();
    let pki = Pki::new();
    let (port, server) = spawn_server(&pki.issue("node1.cluster.internal"), None);

    let mut socket: Box<dyn Socket> = Box::new(socket_trusting(&pki));
    socket.open("node1.cluster.internal", port).unwrap();
    assert!(socket.is_tls());

    let header = b"AMQP\x00\x00\x09\x01";
    assert_eq!(socket.send(header, 0).unwrap(), header.len());
    assert_eq!(recv_exact(socket.as_mut(), header.len()), header);

    socket.close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_writev_sends_fragments_in_order() {
    init_tracing();
    let pki = Pki::new();
    let (port, server) = spawn_server(&pki.issue("node1.cluster.internal"), None);

    let mut socket = socket_trusting(&pki);
    socket.open("node1.cluster.internal", port).unwrap();

    let body = vec![0x42u8; 2000];
    let frame = [
        IoSlice::new(b"\x01\x00\x01\x00\x00\x07\xd0"),
        IoSlice::new(&body),
        IoSlice::new(b"\xce"),
    ];
    assert_eq!(socket.writev(&frame).unwrap(), 2008);

    let echoed = recv_exact(&mut socket, 2008);
    assert_eq!(&echoed[..7], b"\x01\x00\x01\x00\x00\x07\xd0");
    assert_eq!(&echoed[7..2007], &body[..]);
    assert_eq!(echoed[2007], 0xce);

    // a smaller frame reuses the same buffer
    assert_eq!(socket.writev(&[IoSlice::new(b"tiny")]).unwrap(), 4);
    assert_eq!(recv_exact(&mut socket, 4), b"tiny");

    Box::new(socket).close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_frames_larger_than_tls_buffer_are_sent_whole() {
    init_tracing();
    let pki = Pki::new();
    let (port, server) = spawn_sink(&pki.issue("node1.cluster.internal"));

    let mut socket = socket_trusting(&pki);
    socket.open("node1.cluster.internal", port).unwrap();

    // 128 KiB body, the default AMQP frame_max
    let body = vec![0x42u8; 131_072];
    let header = b"\x01\x00\x01";
    let n = socket
        .writev(&[IoSlice::new(header), IoSlice::new(&body)])
        .unwrap();
    assert_eq!(n, header.len() + body.len());

    let large = vec![0x17u8; 200_000];
    assert_eq!(socket.send(&large, 0).unwrap(), large.len());
    assert!(socket.last_error().is_none());

    Box::new(socket).close().unwrap();
    let received = server.join().unwrap();
    assert_eq!(received.len(), header.len() + body.len() + large.len());
    assert_eq!(&received[..3], header);
    assert!(received[3..3 + body.len()].iter().all(|&b| b == 0x42));
    assert!(received[3 + body.len()..].iter().all(|&b| b == 0x17));
}

#[test]
fn test_recv_after_close_notify_is_zero() {
    init_tracing();
    let pki = Pki::new();
    let (port, server) = spawn_server(&pki.issue("node1.cluster.internal"), None);

    let mut socket = socket_trusting(&pki);
    socket.open("node1.cluster.internal", port).unwrap();
    socket.send(b"close", 0).unwrap();

    let mut buf = [0u8; 64];
    assert_eq!(socket.recv(&mut buf, 0).unwrap(), 0);
    assert!(socket.last_error().is_none());

    Box::new(socket).close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_open_twice_is_rejected() {
    init_tracing();
    let pki = Pki::new();
    let (port, server) = spawn_server(&pki.issue("node1.cluster.internal"), None);

    let mut socket = socket_trusting(&pki);
    socket.open("node1.cluster.internal", port).unwrap();
    let err = socket.open("node1.cluster.internal", port).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Config);
    // the first connection is untouched
    assert!(socket.descriptor().is_some());

    Box::new(socket).close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_mutual_tls() {
    init_tracing();
    let pki = Pki::new();
    let (port, server) = spawn_server(&pki.issue("node1.cluster.internal"), Some(pki.roots()));
    let client = pki.issue("amqp-client");

    let mut socket = socket_trusting(&pki);
    socket
        .set_client_identity(&client.cert_path, &client.key_path)
        .unwrap();
    socket.open("node1.cluster.internal", port).unwrap();

    assert_eq!(socket.send(b"ping", 0).unwrap(), 4);
    assert_eq!(recv_exact(&mut socket, 4), b"ping");

    Box::new(socket).close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_mutual_tls_without_client_identity_fails() {
    init_tracing();
    let pki = Pki::new();
    let (port, server) = spawn_server(&pki.issue("node1.cluster.internal"), Some(pki.roots()));

    let mut socket = socket_trusting(&pki);
    let result = socket
        .open("node1.cluster.internal", port)
        .and_then(|()| {
            // TLS 1.3 reports the rejected client certificate on first use
            socket.send(b"ping", 0)?;
            let mut buf = [0u8; 4];
            socket.recv(&mut buf, 0)
        });
    let err = result.unwrap_err();
    assert!(matches!(err, Error::Tls(_) | Error::Io(_)), "unexpected error: {}", err);

    Box::new(socket).close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_connect_from_config() {
    init_tracing();
    let pki = Pki::new();
    let (port, server) = spawn_server(&pki.issue("localhost"), None);

    let config = TlsConfig::builder().ca_cert_path(pki.ca_path()).build();
    let mut socket = TlsSocket::connect("localhost", port, &config).unwrap();
    assert_eq!(socket.send(b"hello", 0).unwrap(), 5);
    assert_eq!(recv_exact(&mut socket, 5), b"hello");

    Box::new(socket).close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_from_config_rejects_missing_ca() {
    let config = TlsConfig::builder()
        .ca_cert_path("/nonexistent/ca.pem")
        .build();
    let err = TlsSocket::from_config(&config).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Config);
}

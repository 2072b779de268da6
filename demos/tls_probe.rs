//! Open a TLS connection to a broker and report what was negotiated
//!
//! Usage:
//!
//! ```bash
//! RUST_LOG=amqp_transport=debug cargo run --example tls_probe -- broker.example.com 5671 /path/to/ca.pem
//! ```
//!
//! The CA path is optional; the system roots are used without it. Set
//! `TLS_PROBE_NO_VERIFY=true` to skip the common name check.

use amqp_transport::{Socket, TlsConfig, TlsSocket};
use std::env;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("amqp_transport=info")),
        )
        .init();

    let mut args = env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "localhost".to_string());
    let port: u16 = args.next().as_deref().unwrap_or("5671").parse()?;

    let verify = !env::var("TLS_PROBE_NO_VERIFY")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let mut builder = TlsConfig::builder().verify_hostname(verify);
    if let Some(ca) = args.next() {
        builder = builder.ca_cert_path(ca);
    }
    let config = builder.build();

    let mut socket = TlsSocket::connect(&host, port, &config)?;
    if let Some(fingerprint) = socket.peer_fingerprint() {
        let hex: Vec<String> = fingerprint.iter().map(|b| format!("{:02X}", b)).collect();
        println!("connected to {}:{}", host, port);
        println!("peer sha256 fingerprint: {}", hex.join(":"));
    }

    // AMQP 0-9-1 protocol header; a broker answers with Connection.Start
    let sent = socket.send(b"AMQP\x00\x00\x09\x01", 0)?;
    let mut buf = [0u8; 512];
    let received = socket.recv(&mut buf, 0)?;
    println!("sent {} bytes, received {} bytes", sent, received);

    Box::new(socket).close()?;
    Ok(())
}

//! Metric names and label values

/// Counter: sockets successfully opened
pub const SOCKETS_OPENED: &str = "amqp_transport_sockets_opened_total";

/// Counter: socket open failures
pub const SOCKET_OPEN_FAILURES: &str = "amqp_transport_socket_open_failures_total";

/// Counter: certificate verification failures
pub const VERIFICATION_FAILURES: &str = "amqp_transport_verification_failures_total";

/// Counter: send/recv calls that reported "try again"
pub const TRANSIENT_RETRIES: &str = "amqp_transport_transient_retries_total";

/// Gauge: live TLS engine lifecycle references
pub const ENGINE_REFERENCES: &str = "amqp_transport_tls_engine_references";

/// Histogram: TLS handshake duration in seconds
pub const HANDSHAKE_DURATION: &str = "amqp_transport_tls_handshake_duration_seconds";

/// Label key for the transport kind
pub const TRANSPORT: &str = "transport";

/// Label key for an error category
pub const REASON: &str = "reason";

/// Label key for the I/O direction
pub const DIRECTION: &str = "direction";

/// Plain TCP transport
pub const TRANSPORT_TCP: &str = "tcp";

/// TLS transport
pub const TRANSPORT_TLS: &str = "tls";

/// Outbound direction
pub const DIRECTION_SEND: &str = "send";

/// Inbound direction
pub const DIRECTION_RECV: &str = "recv";

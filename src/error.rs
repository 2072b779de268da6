//! Error types for amqp-transport

use std::collections::TryReserveError;
use std::io;
use thiserror::Error;

/// Main error type for transport operations
#[derive(Debug, Error)]
pub enum Error {
    /// OS-level socket error
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Host name resolution failed
    #[error("failed to resolve '{host}': {source}")]
    Resolve {
        /// Host that was being resolved
        host: String,
        /// Underlying resolver error
        #[source]
        source: io::Error,
    },

    /// Host name resolved to no usable address
    #[error("no address found for '{0}'")]
    NoAddress(String),

    /// Coalescing buffer could not grow
    #[error("buffer allocation failed: {0}")]
    Alloc(#[from] TryReserveError),

    /// TLS handshake or record-layer failure
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    /// Peer certificate chain did not validate against the trust roots
    #[error("certificate chain verification failed: {0}")]
    CertificateChain(String),

    /// Peer certificate common name does not match the requested host
    #[error("certificate does not match host '{host}'")]
    HostnameMismatch {
        /// Host the caller asked to reach
        host: String,
    },

    /// Invalid configuration (certificate files, keys, host names)
    #[error("configuration error: {0}")]
    Config(String),

    /// Operation requires an open connection
    #[error("socket is not connected")]
    NotConnected,

    /// Option exists in the contract but has no implementation
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// TLS engine bootstrap or lifecycle failure
    #[error("tls engine error: {0}")]
    Engine(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Copyable classification of an [`Error`], kept by sockets for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// OS error number (`errno`), or `-1` when the OS gave none
    Os(i32),
    /// Host name resolution failed
    HostnameResolution,
    /// Allocation failure
    Alloc,
    /// TLS handshake or protocol fault
    Tls,
    /// Certificate chain rejected
    CertificateChain,
    /// Certificate hostname check failed
    HostnameVerification,
    /// Bad configuration
    Config,
    /// Not connected
    NotConnected,
    /// Unimplemented option
    Unsupported,
    /// TLS engine lifecycle failure
    Engine,
}

impl ErrorCode {
    /// Negative integer status for callers that speak in status codes.
    ///
    /// OS errors map to `-errno`; library categories use a fixed range
    /// starting at `-0x0100` so they never collide with small errno values.
    pub fn status(self) -> i32 {
        match self {
            Self::Os(errno) if errno > 0 => -errno,
            Self::Os(_) => -1,
            Self::HostnameResolution => -0x0100,
            Self::Alloc => -0x0101,
            Self::Tls => -0x0102,
            Self::CertificateChain => -0x0103,
            Self::HostnameVerification => -0x0104,
            Self::Config => -0x0105,
            Self::NotConnected => -0x0106,
            Self::Unsupported => -0x0107,
            Self::Engine => -0x0108,
        }
    }

    /// Whether this is one of the certificate verification categories
    pub fn is_verification(self) -> bool {
        matches!(self, Self::CertificateChain | Self::HostnameVerification)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Os(errno) => write!(f, "os error {}", errno),
            Self::HostnameResolution => write!(f, "hostname resolution"),
            Self::Alloc => write!(f, "allocation"),
            Self::Tls => write!(f, "tls"),
            Self::CertificateChain => write!(f, "certificate chain"),
            Self::HostnameVerification => write!(f, "hostname verification"),
            Self::Config => write!(f, "config"),
            Self::NotConnected => write!(f, "not connected"),
            Self::Unsupported => write!(f, "unsupported"),
            Self::Engine => write!(f, "engine"),
        }
    }
}

impl Error {
    /// Classify this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Io(e) => io_code(e),
            Error::Resolve { .. } | Error::NoAddress(_) => ErrorCode::HostnameResolution,
            Error::Alloc(_) => ErrorCode::Alloc,
            Error::Tls(_) => ErrorCode::Tls,
            Error::CertificateChain(_) => ErrorCode::CertificateChain,
            Error::HostnameMismatch { .. } => ErrorCode::HostnameVerification,
            Error::Config(_) => ErrorCode::Config,
            Error::NotConnected => ErrorCode::NotConnected,
            Error::Unsupported(_) => ErrorCode::Unsupported,
            Error::Engine(_) => ErrorCode::Engine,
        }
    }

    /// Negative status derived from [`Error::code`]
    pub fn status(&self) -> i32 {
        self.code().status()
    }

    /// Short label used for metrics
    pub fn category(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Resolve { .. } | Error::NoAddress(_) => "resolve",
            Error::Alloc(_) => "alloc",
            Error::Tls(_) => "tls",
            Error::CertificateChain(_) => "certificate_chain",
            Error::HostnameMismatch { .. } => "hostname_mismatch",
            Error::Config(_) => "config",
            Error::NotConnected => "not_connected",
            Error::Unsupported(_) => "unsupported",
            Error::Engine(_) => "engine",
        }
    }
}

/// rustls surfaces record-layer faults as `io::Error` wrapping a `rustls::Error`
fn io_code(e: &io::Error) -> ErrorCode {
    if let Some(inner) = e.get_ref() {
        if inner.is::<rustls::Error>() {
            return ErrorCode::Tls;
        }
    }
    ErrorCode::Os(e.raw_os_error().unwrap_or(-1))
}

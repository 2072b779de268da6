//! TLS socket configuration

use crate::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Settings applied to a [`crate::TlsSocket`] before it is opened.
///
/// By default the peer is checked against the system root certificates and
/// its common name must match the requested host.
///
/// # Examples
///
/// ```
/// use amqp_transport::TlsConfig;
///
/// // With system root certificates
/// let tls = TlsConfig::builder().build();
/// assert!(tls.verify_hostname());
///
/// // With a private CA and a client identity
/// let tls = TlsConfig::builder()
///     .ca_cert_path("/etc/rabbitmq/ca.pem")
///     .client_identity("/etc/rabbitmq/client.pem", "/etc/rabbitmq/client.key")
///     .build();
/// assert!(tls.client_identity()?.is_some());
/// # Ok::<(), amqp_transport::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// PEM file of trusted CA certificates (None = system roots)
    ca_cert_path: Option<PathBuf>,
    /// PEM certificate chain presented to the server
    client_cert_path: Option<PathBuf>,
    /// PEM private key matching `client_cert_path`
    client_key_path: Option<PathBuf>,
    /// Whether the certificate common name must match the host
    verify_hostname: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            ca_cert_path: None,
            client_cert_path: None,
            client_key_path: None,
            verify_hostname: true,
        }
    }
}

impl TlsConfig {
    /// Create a new TLS configuration builder.
    pub fn builder() -> TlsConfigBuilder {
        TlsConfigBuilder::default()
    }

    /// Path of the CA certificate file, if one is configured
    pub fn ca_cert_path(&self) -> Option<&PathBuf> {
        self.ca_cert_path.as_ref()
    }

    /// Client certificate and key paths, when both are configured.
    ///
    /// Setting only one of the two is a configuration error.
    pub fn client_identity(&self) -> Result<Option<(&PathBuf, &PathBuf)>> {
        match (&self.client_cert_path, &self.client_key_path) {
            (Some(cert), Some(key)) => Ok(Some((cert, key))),
            (None, None) => Ok(None),
            (Some(_), None) => Err(Error::Config(
                "client_cert_path is set without client_key_path".to_string(),
            )),
            (None, Some(_)) => Err(Error::Config(
                "client_key_path is set without client_cert_path".to_string(),
            )),
        }
    }

    /// Check if hostname verification is enabled.
    pub fn verify_hostname(&self) -> bool {
        self.verify_hostname
    }
}

/// Builder for TLS configuration.
#[derive(Debug, Default)]
pub struct TlsConfigBuilder {
    config: TlsConfig,
}

impl TlsConfigBuilder {
    /// Set the path to a custom CA certificate file (PEM format).
    ///
    /// If not set, system root certificates will be used.
    pub fn ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.ca_cert_path = Some(path.into());
        self
    }

    /// Present a client certificate chain and private key (PEM format)
    pub fn client_identity(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.config.client_cert_path = Some(cert.into());
        self.config.client_key_path = Some(key.into());
        self
    }

    /// Enable or disable hostname verification (default: enabled).
    ///
    /// When enabled, the subject common name of the server certificate must
    /// equal the requested host, ignoring ASCII case.
    pub fn verify_hostname(mut self, verify: bool) -> Self {
        self.config.verify_hostname = verify;
        self
    }

    /// Build the TLS configuration.
    ///
    /// Files are only read when the configuration is applied to a socket.
    pub fn build(self) -> TlsConfig {
        self.config
    }
}

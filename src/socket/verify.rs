//! Peer certificate checks
//!
//! Chain validation happens during the handshake through [`ChainRecorder`],
//! which records a verdict instead of aborting. Hostname validation happens
//! after the handshake by comparing the subject common name of the leaf
//! certificate with the requested host.

use parking_lot::Mutex;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::server::ParsedCertificate;
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use std::sync::Arc;

/// Common names of this many bytes or more never match
pub const MAX_COMMON_NAME_LEN: usize = 256;

// ASN.1 universal tag numbers of the string types a common name may use
const TAG_UTF8_STRING: u32 = 12;
const TAG_NUMERIC_STRING: u32 = 18;
const TAG_PRINTABLE_STRING: u32 = 19;
const TAG_T61_STRING: u32 = 20;
const TAG_IA5_STRING: u32 = 22;
const TAG_VISIBLE_STRING: u32 = 26;
const TAG_UNIVERSAL_STRING: u32 = 28;
const TAG_BMP_STRING: u32 = 30;

/// Compare a certificate common name, as UTF-8 bytes, with `host`.
///
/// Trailing NUL bytes are ignored. The name must be shorter than
/// [`MAX_COMMON_NAME_LEN`], contain no other NUL and no ASCII control
/// character, and equal `host` ignoring ASCII case. Wildcards are not
/// expanded.
pub fn common_name_matches(host: &str, cn: &[u8]) -> bool {
    check_common_name(host, cn).is_ok()
}

fn check_common_name(host: &str, cn: &[u8]) -> Result<(), &'static str> {
    let end = cn.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    let cn = &cn[..end];

    if cn.len() >= MAX_COMMON_NAME_LEN {
        return Err("common name too long");
    }
    if cn.contains(&0) {
        return Err("embedded nul in common name");
    }
    if cn.iter().any(u8::is_ascii_control) {
        return Err("control character in common name");
    }
    if !cn.eq_ignore_ascii_case(host.as_bytes()) {
        return Err("common name does not match host");
    }
    Ok(())
}

/// First subject common name of a DER certificate, converted to UTF-8.
///
/// `None` when the certificate does not parse, has no common name, or the
/// name uses an encoding that cannot be converted.
pub fn peer_common_name(der: &[u8]) -> Option<Vec<u8>> {
    let (_, cert) = x509_parser::parse_x509_certificate(der).ok()?;
    let attr = cert.subject().iter_common_name().next()?;
    let value = attr.attr_value();
    string_to_utf8(value.header.tag().0, value.data)
}

fn string_to_utf8(tag: u32, data: &[u8]) -> Option<Vec<u8>> {
    match tag {
        TAG_UTF8_STRING => std::str::from_utf8(data).ok().map(|s| s.as_bytes().to_vec()),
        // single-byte encodings, widened as Latin-1
        TAG_NUMERIC_STRING | TAG_PRINTABLE_STRING | TAG_T61_STRING | TAG_IA5_STRING
        | TAG_VISIBLE_STRING => Some(
            data.iter()
                .map(|&b| char::from(b))
                .collect::<String>()
                .into_bytes(),
        ),
        TAG_BMP_STRING => {
            if data.len() % 2 != 0 {
                return None;
            }
            let units = data.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]]));
            char::decode_utf16(units)
                .collect::<Result<String, _>>()
                .ok()
                .map(String::into_bytes)
        }
        TAG_UNIVERSAL_STRING => {
            if data.len() % 4 != 0 {
                return None;
            }
            data.chunks_exact(4)
                .map(|c| char::from_u32(u32::from_be_bytes([c[0], c[1], c[2], c[3]])))
                .collect::<Option<String>>()
                .map(String::into_bytes)
        }
        _ => None,
    }
}

/// Whether the leaf certificate `der` was issued for `host`
pub fn verify_peer_hostname(der: &[u8], host: &str) -> bool {
    let Some(cn) = peer_common_name(der) else {
        tracing::debug!(host, "peer certificate has no usable common name");
        return false;
    };
    match check_common_name(host, &cn) {
        Ok(()) => true,
        Err(reason) => {
            tracing::debug!(
                host,
                common_name = %String::from_utf8_lossy(&cn),
                reason,
                "peer hostname rejected"
            );
            false
        }
    }
}

/// Outcome of chain validation recorded during a handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ChainVerdict {
    Valid,
    Invalid(String),
}

/// Server certificate verifier that validates the chain against `roots`
/// and records the result without failing the handshake.
///
/// Names are not checked here. Handshake signatures are still verified.
#[derive(Debug)]
pub(crate) struct ChainRecorder {
    roots: Arc<RootCertStore>,
    provider: Arc<CryptoProvider>,
    verdict: Mutex<Option<ChainVerdict>>,
}

impl ChainRecorder {
    pub(crate) fn new(roots: Arc<RootCertStore>, provider: Arc<CryptoProvider>) -> Self {
        Self {
            roots,
            provider,
            verdict: Mutex::new(None),
        }
    }

    /// Verdict of the last handshake, `None` if no certificate was seen
    pub(crate) fn verdict(&self) -> Option<ChainVerdict> {
        self.verdict.lock().clone()
    }

    fn check_chain(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<(), rustls::Error> {
        let cert = ParsedCertificate::try_from(end_entity)?;
        rustls::client::verify_server_cert_signed_by_trust_anchor(
            &cert,
            &self.roots,
            intermediates,
            now,
            self.provider.signature_verification_algorithms.all,
        )
    }
}

impl ServerCertVerifier for ChainRecorder {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let verdict = match self.check_chain(end_entity, intermediates, now) {
            Ok(()) => ChainVerdict::Valid,
            Err(e) => {
                tracing::debug!(error = %e, "peer certificate chain rejected");
                ChainVerdict::Invalid(e.to_string())
            }
        };
        *self.verdict.lock() = Some(verdict);
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

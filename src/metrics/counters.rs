//! Counter metrics

use super::labels;

/// A socket finished `open` successfully
pub fn socket_opened(transport: &'static str) {
    metrics::counter!(labels::SOCKETS_OPENED, labels::TRANSPORT => transport).increment(1);
}

/// A socket failed to open
pub fn socket_open_failed(transport: &'static str, reason: &'static str) {
    metrics::counter!(
        labels::SOCKET_OPEN_FAILURES,
        labels::TRANSPORT => transport,
        labels::REASON => reason
    )
    .increment(1);
}

/// Certificate chain or hostname verification rejected a peer
pub fn verification_failed(reason: &'static str) {
    metrics::counter!(labels::VERIFICATION_FAILURES, labels::REASON => reason).increment(1);
}

/// A send or recv returned "no progress, retry later"
pub fn transient_retry(transport: &'static str, direction: &'static str) {
    metrics::counter!(
        labels::TRANSIENT_RETRIES,
        labels::TRANSPORT => transport,
        labels::DIRECTION => direction
    )
    .increment(1);
}

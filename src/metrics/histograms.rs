//! Histogram metrics

use super::labels;
use std::time::Duration;

/// Time from TCP connect to a completed TLS handshake
pub fn handshake_duration(duration: Duration) {
    metrics::histogram!(labels::HANDSHAKE_DURATION).record(duration.as_secs_f64());
}

//! Gauge metrics

use super::labels;

/// Current number of live TLS engine lifecycle references
pub fn engine_references(count: usize) {
    metrics::gauge!(labels::ENGINE_REFERENCES).set(count as f64);
}

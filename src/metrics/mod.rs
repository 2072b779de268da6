//! Transport metrics
//!
//! Thin wrappers over the `metrics` facade. Nothing is recorded unless the
//! host process installs a recorder.
//!
//! * [`counters`]: socket opens, open failures, verification failures, retries
//! * [`gauges`]: live TLS engine references
//! * [`histograms`]: handshake duration

pub mod counters;
pub mod gauges;
pub mod histograms;
pub mod labels;

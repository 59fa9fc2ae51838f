//! # httpcap Telemetry
//!
//! Subscriber setup, structured connection-level event logging and the
//! Prometheus counters for the capture pipeline.

pub mod logging;
pub mod metrics;

pub use logging::EventLogger;
pub use metrics::MetricsRecorder;

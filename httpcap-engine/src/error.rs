use thiserror::Error;

use httpcap_capture::CaptureError;
use httpcap_config::ConfigError;

/// Errors surfaced by [`crate::Sniffer::start`]. Per-connection failures
/// never reach this type.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
}

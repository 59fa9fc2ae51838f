use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture device '{0}' not found")]
    DeviceNotFound(String),

    #[error("failed to open capture '{source_name}': {error}")]
    Open {
        source_name: String,
        #[source]
        error: pcap::Error,
    },

    #[error("invalid capture filter '{filter}': {error}")]
    Filter {
        filter: String,
        #[source]
        error: pcap::Error,
    },

    #[error("capture error: {0}")]
    Capture(#[from] pcap::Error),

    #[error("undecodable packet: {0}")]
    Decode(String),
}

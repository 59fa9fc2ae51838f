use thiserror::Error;

use httpcap_protocols::StreamError;

/// Producer-side bridge failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// The consumer did not make room within the append deadline, or the
    /// bridge was aborted.
    #[error("stream unhealthy")]
    StreamUnhealthy,
    #[error("bridge already signalled complete")]
    Closed,
}

impl From<BridgeError> for StreamError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Closed => StreamError::Ended,
            BridgeError::StreamUnhealthy => StreamError::Unhealthy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("event dispatcher is closed")]
    Closed,
    #[error("timed out waiting for an event")]
    Timeout,
}

//! Reconstruction pipeline parameters: event dispatch, stream bridges and
//! HTTP framing limits.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::capture::deserialize_size;

/// Event dispatcher configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
#[serde(default)]
pub struct DispatchConfig {
    /// Worker threads calling the transaction handler. 0 disables callback
    /// delivery.
    #[validate(range(max = 1024))]
    pub workers: usize,

    /// Transactions buffered between pairs and workers.
    #[validate(range(min = 1, max = 1048576))]
    pub queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            queue_capacity: 1024,
        }
    }
}

/// Per-direction stream bridge configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
#[serde(default)]
pub struct BridgeConfig {
    /// Blocks held between reassembly and the framer.
    #[validate(range(min = 1, max = 65536))]
    pub capacity: usize,

    /// How long reassembly waits for room before the stream is declared
    /// unhealthy (milliseconds).
    #[validate(range(min = 1, max = 60000))]
    pub append_timeout_ms: u64,
}

impl BridgeConfig {
    pub fn append_timeout(&self) -> Duration {
        Duration::from_millis(self.append_timeout_ms)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            capacity: 32,
            append_timeout_ms: 1000,
        }
    }
}

/// HTTP framing limits.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
#[serde(default)]
pub struct FramingConfig {
    /// Largest body accepted before the connection is abandoned.
    #[validate(range(min = 1024))]
    #[serde(deserialize_with = "deserialize_size")]
    pub max_body_size: usize,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            max_body_size: 64 * 1024 * 1024,
        }
    }
}

//! TCP reassembly retention.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
#[serde(default)]
pub struct ReassemblyConfig {
    /// Streams idle longer than this (relative to the newest packet) are
    /// flushed across any gap and closed.
    #[validate(range(min = 1, max = 86400))]
    pub retention_secs: u64,

    /// Wall-clock interval between flushes.
    #[validate(range(min = 1, max = 3600))]
    pub flush_interval_secs: u64,

    /// Out-of-order segments held per direction before skipping ahead.
    #[validate(range(min = 1, max = 65536))]
    pub max_buffered_segments: usize,
}

impl ReassemblyConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            retention_secs: 120,
            flush_interval_secs: 60,
            max_buffered_segments: 1024,
        }
    }
}

//! ## httpcap-telemetry::logging
//! **`tracing` subscriber setup and structured pipeline events**
//!
//! Per-pair threads are named `pair-<id>` and dispatcher workers
//! `dispatch-<n>`, so thread names are always printed.

use opentelemetry::KeyValue;
use tracing::info_span;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Clone)]
pub struct EventLogger;

impl EventLogger {
    /// Installs the global subscriber. `RUST_LOG` wins over `default_level`.
    /// Fails if a subscriber is already installed.
    pub fn init(default_level: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
            )
            .with_thread_names(true)
            .try_init()
    }

    /// Records a connection-level event (pair aborted, gap detected, ...).
    #[inline]
    pub fn log_event(event_type: &str, metadata: Vec<KeyValue>) {
        let span = info_span!("pipeline_event", event_type = event_type, otel.kind = "INTERNAL");
        let _entered = span.enter();
        let fields = metadata
            .iter()
            .map(|kv| format!("{}={}", kv.key, kv.value))
            .collect::<Vec<_>>()
            .join(" ");
        tracing::info!(%fields, "Pipeline event");
    }
}

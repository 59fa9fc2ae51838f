use thiserror::Error;

use httpcap_config::ConfigError;
use httpcap_engine::EngineError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("logging setup failed: {0}")]
    Logging(String),

    #[error("failed to export metrics: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("capture task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

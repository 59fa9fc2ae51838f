use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use validator::Validate;

use httpcap_config::{ConfigError, HttpcapConfig};
use httpcap_core::events::TransactionEvent;
use httpcap_engine::{PacketSourceSpec, Sniffer};
use httpcap_telemetry::EventLogger;

use crate::error::CliError;

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Cli {
    /// Configuration file; defaults to `config/httpcap.yaml` plus environment.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print Prometheus metrics on exit.
    #[arg(long, global = true)]
    pub metrics: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Capture live traffic from an interface
    Run(RunArgs),
    /// Replay a pcap file
    Replay(ReplayArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(short, long)]
    pub interface: Option<String>,

    #[arg(long)]
    pub promiscuous: bool,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ReplayArgs {
    #[arg(short, long)]
    pub file: PathBuf,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

/// Overrides shared by both sources.
#[derive(Args, Debug, Clone, Default)]
pub struct PipelineArgs {
    /// BPF filter
    #[arg(long)]
    pub filter: Option<String>,

    /// Handler threads
    #[arg(long)]
    pub workers: Option<usize>,

    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// Idle time before a stream is force-closed
    #[arg(long)]
    pub retention_secs: Option<u64>,
}

impl PipelineArgs {
    fn apply(&self, config: &mut HttpcapConfig) {
        if let Some(filter) = &self.filter {
            config.capture.filter = filter.clone();
        }
        if let Some(workers) = self.workers {
            config.dispatch.workers = workers;
        }
        if let Some(capacity) = self.queue_capacity {
            config.dispatch.queue_capacity = capacity;
        }
        if let Some(secs) = self.retention_secs {
            config.reassembly.retention_secs = secs;
        }
    }
}

impl Cli {
    /// Loads configuration and layers the command-line overrides on top.
    pub fn resolve(&self) -> Result<(HttpcapConfig, PacketSourceSpec), CliError> {
        let mut config = match &self.config {
            Some(path) => HttpcapConfig::load_from_path(path)?,
            None => HttpcapConfig::load()?,
        };

        let source = match &self.command {
            Commands::Run(args) => {
                if let Some(interface) = &args.interface {
                    config.capture.interface = interface.clone();
                }
                config.capture.promiscuous |= args.promiscuous;
                args.pipeline.apply(&mut config);
                PacketSourceSpec::Live
            }
            Commands::Replay(args) => {
                args.pipeline.apply(&mut config);
                PacketSourceSpec::Offline(args.file.clone())
            }
        };

        // The command line exists to print transactions.
        if config.dispatch.workers == 0 {
            config.dispatch.workers = 1;
        }
        config.validate().map_err(ConfigError::from)?;
        Ok((config, source))
    }
}

pub async fn run_command(cli: Cli) -> Result<(), CliError> {
    let (config, source) = cli.resolve()?;
    EventLogger::init(&config.telemetry.log_level).map_err(|e| CliError::Logging(e.to_string()))?;

    let sniffer = Sniffer::new(config)?
        .source(source)
        .on_transaction(log_transaction);
    let metrics = sniffer.metrics().clone();

    let terminate = Arc::new(AtomicBool::new(false));
    let flag = terminate.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, stopping capture");
                flag.store(true, Ordering::Relaxed);
            }
            Err(e) => warn!(error = %e, "Cannot listen for interrupts"),
        }
    });

    let result = tokio::task::spawn_blocking(move || sniffer.start(terminate)).await?;

    if cli.metrics {
        println!("{}", metrics.gather_metrics()?);
    }
    Ok(result?)
}

fn log_transaction(tx: &TransactionEvent) {
    info!(
        seq = tx.seq(),
        client = %tx.client_addr(),
        server = %tx.request.server_addr,
        method = %tx.request.method,
        uri = %tx.request.uri,
        status = tx.response.code,
        request_bytes = tx.request.body.len(),
        response_bytes = tx.response.body.len(),
        latency_ms = tx.latency().num_milliseconds(),
        "Transaction"
    );
}

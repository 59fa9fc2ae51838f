//! ## httpcap
//! **Command-line front end**
//!
//! Captures live traffic or replays a pcap file and logs one line per
//! reconstructed HTTP transaction.

use clap::Parser;

mod commands;
mod error;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    commands::run_command(cli).await?;
    Ok(())
}

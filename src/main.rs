mod auth;
mod cli;
mod config;
mod error;
mod output;
mod providers;
mod report;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    output::print_banner();

    let cli = Cli::parse();
    info!("Starting adoscan - Azure DevOps Authorization & Exposure Scanner");
    cli.execute()
        .await
        .inspect_err(|e| error!("Error during scan: {e:#}"))?;

    Ok(())
}

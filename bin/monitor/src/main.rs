use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use common::config::MonitorConfig;
use eyre::Result;
use tracing::{error, info};
use watcher::program::MonitorProgram;

#[derive(Parser)]
#[command(
    name = "socket-monitor",
    about = "Watches seals and proposals across chains and trips mismatched proposals",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Monitor seals and proposals and send trips if needed
    Monitor {
        /// Path to the TOML config file
        #[arg(long)]
        config_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Monitor { config_file } => monitor(config_file).await,
    }
}

async fn monitor(config_file: PathBuf) -> Result<()> {
    let config = MonitorConfig::load(&config_file)?;
    let mut program = MonitorProgram::new(config);
    program.init().await?;
    let program = Arc::new(program);

    let mut run = {
        let program = Arc::clone(&program);
        tokio::spawn(async move { program.run().await })
    };

    tokio::select! {
        joined = &mut run => flatten(joined),
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, stopping");
            program.stop();
            // Cooperative stop: the monitor and processor loops exit at
            // their next iteration boundary, so wait for them instead of
            // cancelling mid-transaction.
            flatten(run.await)
        }
    }
}

fn flatten(joined: Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(result) => {
            if let Err(error) = &result {
                error!(%error, "monitor exited with an error");
            }
            result
        }
        Err(join_error) => Err(eyre::Report::new(join_error)),
    }
}

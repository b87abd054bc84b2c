//! `tidepool` - inspect configuration and dry-run the rotation coordinator.

mod config;
#[cfg(feature = "simulate")]
mod simulate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Overrides;
#[cfg(feature = "simulate")]
use crate::simulate::Scenario;

#[derive(Parser)]
#[command(name = "tidepool")]
#[command(about = "Credential rotation coordinator", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true, env = "TIDEPOOL_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log filter directive (overrides TIDEPOOL_LOG / RUST_LOG)
    #[arg(long, global = true, value_name = "FILTER")]
    log: Option<String>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolved configuration as JSON
    Config,
    /// Run a scenario against in-memory collaborators and print a report
    #[cfg(feature = "simulate")]
    Simulate {
        /// Scenario to run
        #[arg(short, long, value_enum, default_value = "manual")]
        scenario: Scenario,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut log_config = tidepool_log::Config::from_env();
    if let Some(filter) = cli.log {
        log_config.level = filter;
    }
    let _log = tidepool_log::init_with(log_config)?;

    let config = config::load(cli.config.as_deref(), &cli.overrides)?;
    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        #[cfg(feature = "simulate")]
        Commands::Simulate { scenario } => {
            let report = simulate::run(config, scenario).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

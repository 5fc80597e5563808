//! HomeLink Daemon
//!
//! Bridges the local MQTT bus to the HomeLink cloud relay.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use daemon::bus::MqttBus;
use daemon::cloud::CloudLink;
use daemon::config::Config;
use tracing::info;

/// HomeLink daemon - cloud relay bridge for the local bus.
#[derive(Parser, Debug)]
#[command(name = "homelink")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute (defaults to `run`)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands for the daemon.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the bridge (default)
    Run,

    /// Print the effective configuration and exit
    Config,
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.daemon.log_level.clone()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command.clone().unwrap_or(Commands::Run) {
        Commands::Config => {
            println!("{}", config.to_toml()?);
            return Ok(());
        }
        Commands::Run => {}
    }

    info!("HomeLink daemon starting...");

    let (bus, bus_events) = MqttBus::connect(&config.mqtt);

    let Some(link) = CloudLink::new(&config, bus, bus_events) else {
        // Missing identity disables the bridge for the process lifetime;
        // stay up (and silent) until the operator fixes the configuration.
        tokio::signal::ctrl_c().await?;
        return Ok(());
    };

    tokio::select! {
        _ = link.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}

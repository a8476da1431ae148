//! netconf-supervisor - self-healing network configurator
//!
//! This binary provides three modes:
//! - `daemon`: Runs the interface controller, failover loop, control socket and HTTP API
//! - `status`: Quick status check (for scripts)
//! - `reload`: Re-apply the desired configuration of every interface

mod config;
mod controller;
mod web;

use clap::{Parser, Subcommand};
use config::{Config, DEFAULT_CONFIG_PATH, DEFAULT_CONTROL_SOCKET};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "netconf-supervisor")]
#[command(about = "Network configuration supervisor with rescue access point", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the supervisor daemon
    Daemon {
        /// Service configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Log mutating commands instead of running them
        #[arg(long)]
        dry_run: bool,

        /// HTTP API port (overrides the configuration file)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Check current status
    Status {
        /// Unix socket path for daemon communication
        #[arg(long, default_value = DEFAULT_CONTROL_SOCKET)]
        socket: String,
    },

    /// Re-apply every interface's desired configuration
    Reload {
        /// Unix socket path for daemon communication
        #[arg(long, default_value = DEFAULT_CONTROL_SOCKET)]
        socket: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon { config, dry_run, port } => {
            let mut config = Config::load(&config)?;
            config.global.dry_run |= dry_run;
            if let Some(port) = port {
                config.server.port = port;
            }
            tracing::info!("Starting netconf-supervisor daemon");
            controller::run_daemon(config).await?;
        }
        Commands::Status { socket } => {
            controller::print_status(&socket).await?;
        }
        Commands::Reload { socket } => {
            controller::request_reload(&socket).await?;
        }
    }

    Ok(())
}

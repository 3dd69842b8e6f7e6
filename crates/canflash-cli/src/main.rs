//! canflash - Command-line tool for Trionic 8 bootloader work over CAN
//!
//! Uploads the Legion bootloader and drives its vendor commands through a
//! SocketCAN interface or the built-in simulated ECU.

mod commands;
mod config;
mod output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use canflash::{create_adapter, Client, RetryPolicy, T8Client};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::commands::DemandKind;
use crate::config::Overrides;
use crate::output::OutputContext;

#[derive(Parser)]
#[command(name = "canflash")]
#[command(author, version, about = "Trionic 8 bootloader tool")]
#[command(propagate_version = true)]
struct Cli {
    /// SocketCAN interface, overrides the config file
    #[arg(short, long, env = "CANFLASH_INTERFACE")]
    interface: Option<String>,

    /// Talk to the simulated ECU instead of a bus
    #[arg(long, conflicts_with = "interface")]
    mock: bool,

    /// Configuration file path
    #[arg(short, long, env = "CANFLASH_CONFIG")]
    config: Option<PathBuf>,

    /// Response timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the Legion bootloader answers
    Ping,

    /// Upload a bootloader image
    Upload {
        /// Raw bootloader image
        file: PathBuf,

        /// Start the bootloader after a successful upload
        #[arg(long)]
        start: bool,
    },

    /// Jump into an uploaded bootloader
    Start {
        /// Start address (hex), defaults to the configured load address
        #[arg(long, value_parser = parse_hex_u32)]
        address: Option<u32>,
    },

    /// Leave the bootloader and reset the ECU
    Exit,

    /// Enable Legion high speed mode
    HighSpeed,

    /// Run a Legion demand command
    Demand {
        #[arg(value_enum)]
        kind: DemandKind,

        /// Command argument
        #[arg(default_value = "0")]
        wish: u16,
    },

    /// Print bus traffic that no request is waiting for
    Monitor {
        /// Only show this CAN ID (hex)
        #[arg(long, value_parser = parse_hex_u32)]
        id: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    let mut config = config::load(cli.config.as_deref())?;
    config::apply(
        &mut config,
        &Overrides {
            interface: cli.interface.clone(),
            mock: cli.mock,
            timeout_ms: cli.timeout_ms,
        },
    );
    config.validate()?;

    let ctx = OutputContext::new(cli.no_color, cli.quiet);

    let adapter = create_adapter(&config.adapter).context("Failed to create CAN adapter")?;
    let client = Arc::new(
        Client::new(adapter, config.client.clone())
            .await
            .context("Failed to open CAN adapter")?,
    );
    let t8 = T8Client::new(client.clone(), config.bootloader.clone())
        .with_retry(RetryPolicy::from(&config.retry));

    // Ctrl+C cancels whatever is in flight
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupted");
            trigger.cancel();
        }
    });

    let result = match &cli.command {
        Commands::Ping => commands::ping(&t8, &cancel, &ctx).await,
        Commands::Upload { file, start } => {
            commands::upload(&t8, &cancel, file, *start, &ctx).await
        }
        Commands::Start { address } => commands::start(&t8, &cancel, *address, &ctx).await,
        Commands::Exit => commands::exit(&t8, &cancel, &ctx).await,
        Commands::HighSpeed => commands::high_speed(&t8, &cancel, &ctx).await,
        Commands::Demand { kind, wish } => {
            commands::demand(&t8, &cancel, (*kind).into(), *wish, &ctx).await
        }
        Commands::Monitor { id } => commands::monitor(&client, &cancel, *id, &ctx).await,
    };

    if let Err(e) = client.close().await {
        ctx.warn(&format!("Failed to close adapter: {}", e));
    }
    result
}

/// Parse `0x102400` or `102400` as hex
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid hex value '{}': {}", s, e))
}

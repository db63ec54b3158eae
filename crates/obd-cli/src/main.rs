//! OBD-II Diagnostics - Main Entry Point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use elm327_driver::{open, Elm327Driver, TransportConfig};
use obd_cli::{commands, init_logging, AppConfig};
use obd_reader::{JsonLinesSink, ObdReader};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "obd-cli")]
#[command(author, version, about = "OBD-II diagnostics over ELM327 adapters")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "OBD_CONFIG")]
    config: Option<PathBuf>,

    /// Serial device of the adapter, e.g. /dev/rfcomm0
    #[arg(short, long, conflicts_with = "address")]
    device: Option<String>,

    /// TCP address of a Wi-Fi adapter, e.g. 192.168.0.10:35000
    #[arg(short, long)]
    address: Option<String>,

    /// Log level override
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run hex queries once, e.g. 010C 010D 03
    Query {
        #[arg(required = true)]
        queries: Vec<String>,
    },

    /// Poll hex queries periodically
    Monitor {
        #[arg(required = true)]
        queries: Vec<String>,

        /// Milliseconds between rounds
        #[arg(long, default_value = "1000")]
        period_ms: u64,

        /// Stop after this many rounds
        #[arg(long)]
        rounds: Option<u64>,
    },

    /// Read stored trouble codes
    Dtcs,

    /// Clear stored trouble codes and turn off the MIL
    ClearDtcs {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },

    /// Read the vehicle identification number
    Vin,

    /// List PIDs the vehicle supports for a mode
    Supported {
        /// Mode in hex
        #[arg(long, default_value = "01", value_parser = parse_hex_byte)]
        mode: u8,
    },
}

fn parse_hex_byte(text: &str) -> Result<u8, String> {
    u8::from_str_radix(text.trim_start_matches("0x"), 16).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(device) = cli.device {
        config.transport = TransportConfig::Serial {
            device,
            baud_rate: None,
        };
    }
    if let Some(address) = cli.address {
        config.transport = TransportConfig::Tcp { address };
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    init_logging(&config.logging)?;

    info!("=== OBD-II Diagnostics v{} ===", env!("CARGO_PKG_VERSION"));

    let stream = open(&config.transport, config.driver.adapter.protocol)
        .await
        .context("Failed to open adapter")?;
    let driver = Elm327Driver::start(stream, config.driver.clone());
    let reader = ObdReader::new(driver, config.cache.clone());
    let sink = JsonLinesSink::new(std::io::stdout());

    let outcome = match cli.command {
        Commands::Query { queries } => commands::query(&reader, &sink, &queries).await,
        Commands::Monitor {
            queries,
            period_ms,
            rounds,
        } => {
            tokio::select! {
                result = commands::monitor(&reader, &sink, &queries, Duration::from_millis(period_ms), rounds) => result,
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    Ok(())
                }
            }
        }
        Commands::Dtcs => commands::trouble_codes(&reader, &sink).await,
        Commands::ClearDtcs { yes } => {
            if yes {
                commands::clear_trouble_codes(&reader).await
            } else {
                Err(anyhow::anyhow!("Refusing to clear trouble codes without --yes"))
            }
        }
        Commands::Vin => commands::vin(&reader, &sink).await,
        Commands::Supported { mode } => commands::supported(&reader, &sink, mode).await,
    };

    reader.into_channel().shutdown().await;
    outcome
}

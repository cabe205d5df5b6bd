//! xcomctl - Xcom-CAN public protocol client
//!
//! Reads user infos and parameters, writes parameters and listens for
//! message notifications through an Xcom-CAN gateway.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use xcom_can::{Address, CanDriver, ParameterPart, XcomClient, XcomConfig, XcomError};

#[derive(Parser)]
#[command(name = "xcomctl")]
#[command(about = "Xcom-CAN public protocol client")]
#[command(long_about = "Xcom-CAN public protocol client

Examples:
  xcomctl user-info 101 3000                 # Battery voltage of the first Xtender
  xcomctl read-param 101 1286 --part flash-max
  xcomctl write-param 101 1286 230 --part ram
  xcomctl messages --listen-secs 10

Device addresses: Xtender 101..109, VarioTrack 301..315, BSP 601,
VarioString 701..715; group addresses 100, 300, 700.")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (YAML, TOML or JSON)
    #[arg(short = 'c', long, global = true, env = "XCOM_CONFIG")]
    config: Option<PathBuf>,

    /// Source address of this client
    #[arg(short, long, global = true, value_parser = parse_address)]
    address: Option<Address>,

    /// CAN interface (can0, vcan0, ...)
    #[arg(short, long, global = true)]
    interface: Option<String>,

    /// Log level or filter (info, debug, xcom_can=trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Response timeout in milliseconds
    #[arg(short, long, global = true)]
    timeout_ms: Option<u64>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a user info value
    UserInfo {
        /// Device address
        #[arg(value_parser = parse_address)]
        destination: Address,
        info_id: u16,
    },

    /// Read a parameter value
    ReadParam {
        /// Device address
        #[arg(value_parser = parse_address)]
        destination: Address,
        parameter_id: u16,

        /// flash, flash-min, flash-max or ram
        #[arg(short, long, default_value = "flash", value_parser = parse_part)]
        part: ParameterPart,
    },

    /// Write a parameter value
    WriteParam {
        /// Device address (or group address)
        #[arg(value_parser = parse_address)]
        destination: Address,
        parameter_id: u16,
        value: f32,

        /// flash or ram; ram avoids flash wear on cyclic writes
        #[arg(short, long, default_value = "ram", value_parser = parse_part)]
        part: ParameterPart,
    },

    /// Print message notifications received on the bus
    Messages {
        /// How long to listen before printing
        #[arg(short, long, default_value_t = 5)]
        listen_secs: u64,
    },
}

fn parse_address(s: &str) -> std::result::Result<Address, String> {
    let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse::<u16>(),
    }
    .map_err(|e| format!("invalid address '{s}': {e}"))?;
    Address::new(value).map_err(|e| e.to_string())
}

fn parse_part(s: &str) -> std::result::Result<ParameterPart, String> {
    s.parse::<ParameterPart>().map_err(|e| e.to_string())
}

fn load_config(cli: &Cli) -> Result<XcomConfig> {
    let mut config = XcomConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    if let Some(address) = cli.address {
        config.address = address;
    }
    if let Some(interface) = &cli.interface {
        config.interface = interface.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.default_timeout_ms = timeout_ms;
    }

    config.validate()?;
    Ok(config)
}

#[cfg(all(target_os = "linux", feature = "can-linux"))]
fn open_driver(config: &XcomConfig) -> Result<Arc<dyn CanDriver>> {
    let driver = xcom_can::SocketCanDriver::open(&config.interface)
        .with_context(|| format!("Cannot open CAN interface {}", config.interface))?;
    Ok(Arc::new(driver))
}

#[cfg(not(all(target_os = "linux", feature = "can-linux")))]
fn open_driver(_config: &XcomConfig) -> Result<Arc<dyn CanDriver>> {
    anyhow::bail!("No CAN driver compiled in: rebuild on Linux with `--features can-linux`")
}

fn report(err: &XcomError) {
    match err {
        XcomError::Protocol(e) => eprintln!(
            "{} device rejected the request: {} (code 0x{:02X})",
            "✗".red(),
            e.category.to_string().red(),
            e.code
        ),
        XcomError::Timeout { .. } => eprintln!("{} {}", "✗".red(), err.to_string().yellow()),
        _ => eprintln!("{} {}", "✗".red(), err),
    }
}

async fn run(cli: Cli, config: XcomConfig) -> Result<()> {
    let driver = open_driver(&config)?;
    let client = XcomClient::open(driver, &config)?;

    let result = match cli.command {
        Commands::UserInfo {
            destination,
            info_id,
        } => client
            .read_user_info(destination, info_id, None)
            .await
            .map(|value| {
                println!("{} user info {} = {}", "✓".green(), info_id, value.to_string().bold());
            }),
        Commands::ReadParam {
            destination,
            parameter_id,
            part,
        } => client
            .read_parameter(destination, parameter_id, part, None)
            .await
            .map(|value| {
                println!(
                    "{} parameter {} ({:?}) = {}",
                    "✓".green(),
                    parameter_id,
                    part,
                    value.to_string().bold()
                );
            }),
        Commands::WriteParam {
            destination,
            parameter_id,
            value,
            part,
        } => client
            .write_parameter(destination, parameter_id, part, value, None)
            .await
            .map(|written| {
                println!("{} parameter {} ({:?}) <- {}", "✓".green(), written, part, value);
            }),
        Commands::Messages { listen_secs } => {
            debug!("Listening for notifications during {}s", listen_secs);
            tokio::time::sleep(Duration::from_secs(listen_secs)).await;
            let messages = client.messages();
            if messages.is_empty() {
                println!("{}", "No messages received".dimmed());
            }
            for record in messages {
                println!("{}", record);
            }
            Ok(())
        },
    };

    client.close().await;

    if let Err(e) = &result {
        report(e);
        std::process::exit(1);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let config = load_config(&cli)?;
    xcom_can::logging::init(&config.log_level)?;

    run(cli, config).await
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("101").unwrap().value(), 101);
        assert_eq!(parse_address("0x65").unwrap().value(), 101);
        assert!(parse_address("1024").is_err());
        assert!(parse_address("xt1").is_err());
    }

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["xcomctl", "-a", "2", "read-param", "101", "1286", "--part", "flash-max"]);
        assert_eq!(cli.address.map(Address::value), Some(2));
        match cli.command {
            Commands::ReadParam {
                destination,
                parameter_id,
                part,
            } => {
                assert_eq!(destination.value(), 101);
                assert_eq!(parameter_id, 1286);
                assert_eq!(part, ParameterPart::FlashMax);
            },
            _ => panic!("expected read-param"),
        }
    }

    #[test]
    fn test_write_defaults_to_ram() {
        let cli = Cli::parse_from(["xcomctl", "write-param", "101", "1286", "230"]);
        match cli.command {
            Commands::WriteParam { part, value, .. } => {
                assert_eq!(part, ParameterPart::Ram);
                assert_eq!(value, 230.0);
            },
            _ => panic!("expected write-param"),
        }
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "xcomctl",
            "--interface",
            "vcan0",
            "--timeout-ms",
            "250",
            "messages",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.interface, "vcan0");
        assert_eq!(config.default_timeout_ms, 250);
    }
}

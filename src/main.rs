//! cipclient - command line client for CIP control processors

use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cipclient::config::{self, Config};
use cipclient::network::{Connection, NetworkConfig};
use cipclient::protocol::JoinEvent;

/// cipclient - talk to a control processor over CIP
#[derive(Parser)]
#[command(name = "cipclient")]
#[command(author = "CipClient Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Send and monitor joins on a CIP control processor", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Connection target shared by the connecting commands
#[derive(clap::Args)]
struct Target {
    /// Control processor host (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Control processor port
    #[arg(short, long)]
    port: Option<u16>,

    /// Program ID to register as (decimal or 0x-prefixed hex)
    #[arg(long, value_parser = parse_program_id)]
    program_id: Option<u8>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print join changes until interrupted
    Monitor {
        #[command(flatten)]
        target: Target,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Set a digital join
    #[command(group(ArgGroup::new("state").required(true).args(["on", "off"])))]
    Digital {
        #[command(flatten)]
        target: Target,

        /// Join number (1-based)
        #[arg(short, long)]
        join: u16,

        /// Turn the join on
        #[arg(long)]
        on: bool,

        /// Turn the join off
        #[arg(long)]
        off: bool,
    },

    /// Set an analog join
    Analog {
        #[command(flatten)]
        target: Target,

        /// Join number (1-based)
        #[arg(short, long)]
        join: u16,

        /// Value to set
        #[arg(long)]
        value: u16,
    },

    /// Show or generate configuration
    Config {
        /// Generate a sample configuration file
        #[arg(short, long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn parse_program_id(value: &str) -> Result<u8, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid program id '{}': {}", value, e))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    // Initialize logging
    let filter = if let Some(directive) = &config.general.log_filter {
        EnvFilter::new(directive)
    } else if cli.verbose || config.general.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Monitor { target, json } => {
            run_monitor(network_config(&config, target)?, json).await?;
        }
        Commands::Digital {
            target, join, on, ..
        } => {
            let mut conn = Connection::connect(network_config(&config, target)?).await?;
            let sent = conn.send_digital(join, on).await;
            conn.close().await?;
            if sent == 0 {
                anyhow::bail!("Failed to send digital join {}", join);
            }
            println!("d{} = {}", join, if on { "on" } else { "off" });
        }
        Commands::Analog {
            target,
            join,
            value,
        } => {
            let mut conn = Connection::connect(network_config(&config, target)?).await?;
            let sent = conn.send_analog(join, value).await;
            conn.close().await?;
            if sent == 0 {
                anyhow::bail!("Failed to send analog join {}", join);
            }
            println!("a{} = {}", join, value);
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

/// Merge command line overrides into the configured connection settings
fn network_config(config: &Config, target: Target) -> anyhow::Result<NetworkConfig> {
    let mut net = config
        .connection
        .to_network_config(target.host.as_deref())?;
    if let Some(port) = target.port {
        net.port = port;
    }
    if let Some(program_id) = target.program_id {
        net.program_id = program_id;
    }
    Ok(net)
}

/// Print join events until Ctrl+C or connection loss
async fn run_monitor(net: NetworkConfig, json: bool) -> anyhow::Result<()> {
    tracing::info!(
        "Monitoring {}:{} as program ID {:#04x}",
        net.host,
        net.port,
        net.program_id
    );

    let mut conn = Connection::connect(net).await?;
    let mut lost = conn.connection_lost();

    let print = move |event: JoinEvent| {
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::error!("Failed to encode event: {}", e),
            }
        } else {
            match event {
                JoinEvent::Digital { join, state } => {
                    println!("d{} = {}", join, if state { "on" } else { "off" })
                }
                JoinEvent::Analog { join, value } => println!("a{} = {}", join, value),
            }
        }
    };
    conn.add_digital_callback(move |join, state| print(JoinEvent::Digital { join, state }));
    conn.add_analog_callback(move |join, value| print(JoinEvent::Analog { join, value }));

    println!("Press Ctrl+C to disconnect.\n");

    loop {
        tokio::select! {
            result = conn.poll() => {
                if let Err(e) = result {
                    if e.is_fatal() {
                        tracing::error!("Connection ended: {}", e);
                        break;
                    }
                    tracing::warn!("Receive failed: {}", e);
                }
            }
            _ = lost.changed() => {
                if let Some(reason) = lost.borrow().clone() {
                    tracing::error!("Connection lost: {}", reason);
                }
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nDisconnecting...");
                break;
            }
        }
    }

    conn.close().await?;
    tracing::info!(
        "Received {} frames ({} bytes)",
        conn.stats().frames_received,
        conn.stats().bytes_received
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["cipclient", "monitor", "--host", "10.0.0.2", "--json"]);
        assert!(cli.is_ok());

        let cli = Cli::try_parse_from(["cipclient", "digital", "--host", "h", "-j", "5"]);
        assert!(cli.is_err());

        let cli = Cli::try_parse_from(["cipclient", "digital", "-j", "5", "--on", "--off"]);
        assert!(cli.is_err());
    }

    #[test]
    fn test_program_id_parsing() {
        assert_eq!(parse_program_id("3"), Ok(3));
        assert_eq!(parse_program_id("0x0A"), Ok(10));
        assert!(parse_program_id("0x100").is_err());
    }

    #[test]
    fn test_cli_overrides_config() {
        let mut config = Config::default();
        config.connection.host = Some("file-host".to_string());
        let target = Target {
            host: None,
            port: Some(41795),
            program_id: Some(0x0A),
        };

        let net = network_config(&config, target).unwrap();
        assert_eq!(net.host, "file-host");
        assert_eq!(net.port, 41795);
        assert_eq!(net.program_id, 0x0A);
        assert_eq!(net.read_timeout_ms, 100);
    }

    #[test]
    fn test_default_port_is_cip() {
        assert_eq!(Config::default().connection.port, cipclient::protocol::DEFAULT_PORT);
    }
}

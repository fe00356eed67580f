//! Prometheus exporter for Heliotherm heat pumps.
//!
//! Polls the controller over a serial line (directly or through a
//! TCP-to-serial LAN gateway) and serves the decoded registers at /metrics.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use heliotherm_exporter::config::{ConnectionConfig, ExporterConfig, LogFormat};
use heliotherm_exporter::registers::RegisterTable;
use heliotherm_exporter::transport::NetConnector;
use heliotherm_exporter::{HttpServer, Poller};

/// Prometheus exporter for Heliotherm heat pumps.
#[derive(Parser, Debug)]
#[command(name = "heliotherm-exporter")]
#[command(about = "Polls a Heliotherm heat pump and exports registers as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP port to expose the exporter on (default: 9997).
    #[arg(long, env = "HELIOTHERM_PORT")]
    port: Option<u16>,

    /// Hostname or IP of the LAN-to-serial gateway. Without it a local
    /// serial device is used.
    #[arg(long, env = "HELIOTHERM_LAN_GATEWAY")]
    lan_gateway: Option<String>,

    /// TCP port of the LAN gateway (default: 4001).
    #[arg(long, env = "HELIOTHERM_LAN_GATEWAY_PORT")]
    lan_gateway_port: Option<u16>,

    /// Local serial device path (e.g. /dev/ttyUSB0).
    #[arg(long, env = "HELIOTHERM_DEVICE")]
    device: Option<String>,

    /// Baud rate for the local serial device (default: 38400).
    #[arg(long)]
    baud: Option<u32>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

fn apply_overrides(config: &mut ExporterConfig, args: &Args) {
    if let Some(port) = args.port {
        config.http.listen = format!("0.0.0.0:{}", port);
    }

    if let Some(host) = &args.lan_gateway {
        config.connection = Some(ConnectionConfig::Gateway {
            host: host.clone(),
            port: args.lan_gateway_port.unwrap_or(4001),
        });
    } else if let Some(device) = &args.device {
        config.connection = Some(ConnectionConfig::Serial {
            device: device.clone(),
            baud: args.baud.unwrap_or(38400),
            data_bits: 8,
            parity: "none".to_string(),
            stop_bits: 1,
        });
    } else if let Some(new_port) = args.lan_gateway_port {
        // port override also applies to a gateway from the config file
        if let Some(ConnectionConfig::Gateway { port, .. }) = &mut config.connection {
            *port = new_port;
        }
    }

    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_args() -> Args {
        Args {
            config: None,
            port: None,
            lan_gateway: None,
            lan_gateway_port: None,
            device: None,
            baud: None,
            log_level: None,
        }
    }

    #[test]
    fn test_gateway_port_override_without_gateway_flag() {
        let mut config = ExporterConfig::default();
        config.connection = Some(ConnectionConfig::Gateway {
            host: "10.0.0.1".to_string(),
            port: 4001,
        });
        let args = Args {
            lan_gateway_port: Some(8899),
            ..bare_args()
        };

        apply_overrides(&mut config, &args);

        match config.connection.unwrap() {
            ConnectionConfig::Gateway { host, port } => {
                assert_eq!(host, "10.0.0.1");
                assert_eq!(port, 8899);
            }
            other => panic!("expected gateway connection, got {:?}", other),
        }
    }

    #[test]
    fn test_gateway_flag_takes_default_port() {
        let mut config = ExporterConfig::default();
        let args = Args {
            lan_gateway: Some("heatpump.local".to_string()),
            ..bare_args()
        };

        apply_overrides(&mut config, &args);

        match config.connection.unwrap() {
            ConnectionConfig::Gateway { host, port } => {
                assert_eq!(host, "heatpump.local");
                assert_eq!(port, 4001);
            }
            other => panic!("expected gateway connection, got {:?}", other),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration; CLI/env settings win over the file
    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        ExporterConfig::default()
    };
    apply_overrides(&mut config, &args);
    config.validate().context("Invalid configuration")?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::fmt().with_env_filter(filter).json().init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }

    info!("Starting heliotherm-exporter");

    // Register table: built-in set unless the config overrides it
    let table = if config.registers.is_empty() {
        RegisterTable::default_table()
    } else {
        RegisterTable::new(config.registers.clone()).context("Invalid register table")?
    };
    info!(registers = table.len(), "Register table loaded");

    let connection = config
        .connection
        .clone()
        .context("No connection configured")?;

    // A gateway that does not resolve is a configuration error; fail now,
    // not on the first scrape
    if let ConnectionConfig::Gateway { host, port } = &connection {
        let mut addrs = tokio::net::lookup_host((host.as_str(), *port))
            .await
            .with_context(|| format!("Cannot resolve LAN gateway '{}'", host))?;
        if addrs.next().is_none() {
            bail!("LAN gateway '{}' resolved to no addresses", host);
        }
        info!(host = %host, port = *port, "Using LAN gateway");
    } else if let ConnectionConfig::Serial { device, baud, .. } = &connection {
        info!(device = %device, baud = *baud, "Using local serial device");
    }

    let connector = NetConnector::new(
        connection,
        Duration::from_millis(config.poll.response_timeout_ms.max(1000)),
    );
    let poller = Arc::new(Poller::new(Box::new(connector), table, config.poll.clone()));

    let listen_addr = config.listen_addr().context("Invalid listen address")?;
    let server = HttpServer::new(
        Arc::clone(&poller),
        listen_addr,
        config.http.path.clone(),
    );

    // Shutdown on ctrl-c
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    // Bind errors surface here and exit non-zero
    server.run(shutdown_rx).await?;

    // Log out from the controller before exiting
    poller.shutdown().await;
    info!("Exporter stopped");

    Ok(())
}

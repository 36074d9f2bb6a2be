//! nettables - synchronized key-value tables
//!
//! Runs a table server, or a client that writes values and logs every change
//! it sees in one table.

use clap::{Parser, Subcommand};
use nettables_core::{Table, Value};
use nettables_node::{ConnectionRegistry, NodeConfig, NodeRole};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nettables")]
#[command(about = "Peer-synchronized typed key-value tables over TCP")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept peers and serve tables
    Server {
        /// Address to listen on
        #[arg(short, long)]
        bind: Option<SocketAddr>,

        /// Table whose changes are logged
        #[arg(short, long, default_value = "SmartDashboard")]
        table: String,
    },

    /// Connect to a server
    Client {
        /// Server address
        #[arg(short, long)]
        server: Option<SocketAddr>,

        /// Table to watch and write into
        #[arg(short, long, default_value = "SmartDashboard")]
        table: String,

        /// Value to write once connected; dotted keys address sub-tables
        #[arg(short, long = "put", value_name = "KEY=VALUE")]
        puts: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Load configuration (from file if NETTABLES_CONFIG is set, then env overrides)
    let mut config = match NodeConfig::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("NETTABLES_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            if std::env::var("NETTABLES_CONFIG").is_ok() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            NodeConfig::default()
        }
    };

    match cli.command {
        Commands::Server { bind, table } => {
            config.network.role = NodeRole::Server;
            if let Some(bind) = bind {
                config.network.bind_addr = bind;
            }

            let registry = ConnectionRegistry::new(config);
            watch(&registry.table(&table));
            registry.serve().await?;

            tokio::signal::ctrl_c().await?;
            tracing::info!("Received shutdown signal, stopping server...");
            registry.shutdown();
        }
        Commands::Client {
            server,
            table,
            puts,
        } => {
            config.network.role = NodeRole::Client;
            if let Some(server) = server {
                config.network.server_addr = server;
            }
            let assignments = puts
                .iter()
                .map(|p| parse_assignment(p))
                .collect::<Result<Vec<_>, _>>()?;

            let registry = ConnectionRegistry::new(config);
            let table = registry.table(&table);
            watch(&table);
            let connection = registry.connect().await?;

            for (key, value) in assignments {
                table.put_path(&key, value)?;
            }

            tokio::select! {
                _ = connection.closed() => {
                    tracing::warn!("Connection to server lost");
                }
                result = tokio::signal::ctrl_c() => {
                    result?;
                    tracing::info!("Received shutdown signal, disconnecting...");
                }
            }
            registry.shutdown();
        }
    }

    tracing::info!("Stopped");
    Ok(())
}

/// Logs every value change in `table`.
fn watch(table: &Arc<Table>) {
    let name = table.name().unwrap_or_default().to_string();
    table.add_wildcard_listener(move |event| {
        tracing::info!(
            "{}/{} = {}{}",
            name,
            event.key,
            event.value,
            if event.confirmed { "" } else { " (unconfirmed)" }
        );
    });
    table.add_connection_listener(|table, connected| {
        tracing::info!(
            "Table '{}' {}",
            table.name().unwrap_or_default(),
            if connected { "connected" } else { "disconnected" }
        );
    });
}

/// Parses `KEY=VALUE`. Booleans and numbers are typed, anything else is a
/// string.
fn parse_assignment(arg: &str) -> Result<(String, Value), String> {
    let (key, raw) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", arg))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", arg));
    }
    let value = match raw {
        "true" => Value::Boolean(true),
        "false" => Value::Boolean(false),
        _ => {
            if let Ok(v) = raw.parse::<i32>() {
                Value::Integer(v)
            } else if let Ok(v) = raw.parse::<f64>() {
                Value::Double(v)
            } else {
                Value::String(raw.to_string())
            }
        }
    };
    Ok((key.to_string(), value))
}

//! Agent Bus daemon
//!
//! Serves a constitutionally governed message bus over HTTP:
//! message submission, agent registration, health, metrics, chaos
//! injection and recovery control.

use std::net::SocketAddr;

use agent_bus_daemon::{DaemonConfig, Server};
use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Agent Bus daemon CLI
#[derive(Parser)]
#[command(name = "agent-busd")]
#[command(about = "Agent Bus - constitutionally governed message bus", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "AGENT_BUS_CONFIG")]
    config: Option<String>,

    /// Listen address, overrides the configuration file
    #[arg(short, long, env = "AGENT_BUS_LISTEN_ADDR")]
    listen: Option<SocketAddr>,

    /// Log level, overrides the configuration file
    #[arg(long, env = "AGENT_BUS_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "AGENT_BUS_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = DaemonConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?;

    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // RUST_LOG wins over the configured level
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.server.listen_addr,
        "Starting agent bus daemon"
    );

    let server = Server::new(config).context("failed to build message bus")?;
    server.run().await.context("daemon failed")?;
    Ok(())
}

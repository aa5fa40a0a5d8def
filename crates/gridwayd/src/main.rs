//! Gridway data broker daemon
//!
//! Usage:
//!   # Defaults: ./gridway.toml if present, 127.0.0.1:8080
//!   gridwayd
//!
//!   # Explicit configuration
//!   gridwayd --config /etc/gridway/gridway.toml --bind 0.0.0.0:9000

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gridway_rdbc::drivers::DriverRegistry;
use gridway_server::{serve, ServerConfig, ServerContext, ServerObjectRegistry};

#[derive(Parser, Debug)]
#[command(name = "gridwayd", about = "Gridway data broker daemon", version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Bind address, overrides the configured host/port (host:port)
    #[arg(long)]
    bind: Option<String>,

    /// Default log level when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

/// Register every driver this build ships.
fn drivers() -> DriverRegistry {
    #[allow(unused_mut)]
    let mut registry = DriverRegistry::new();
    #[cfg(feature = "postgres")]
    registry.register(
        "postgres",
        Arc::new(gridway_rdbc::postgres::PgConnectionFactory),
    );
    registry
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path).await?,
        None => {
            let default_path = PathBuf::from("gridway.toml");
            if default_path.exists() {
                ServerConfig::load(&default_path).await?
            } else {
                ServerConfig::default()
            }
        }
    };

    if let Some(bind) = &cli.bind {
        let (host, port) = bind
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("--bind expects host:port, got '{bind}'"))?;
        config.host = Some(host.to_string());
        config.port = Some(port.parse()?);
    }

    let default_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        descriptors = %config.data_source.path,
        "starting gridway data broker"
    );

    let ctx = ServerContext::new(config, drivers(), ServerObjectRegistry::new(), vec![]);

    serve(ctx, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    })
    .await
}

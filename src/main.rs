//! Farmcast Broker Server
//!
//! Run with: cargo run --bin farmcast
//!
//! # Configuration
//!
//! Loaded from `config.toml` (see `--config`), with environment overrides:
//! - `FARMCAST_HOST`: host to bind (default: 0.0.0.0)
//! - `FARMCAST_PORT`: port to listen on (default: 8080)
//! - `FARMCAST_WS_PATH`: WebSocket upgrade path (default: /ws)
//! - `FARMCAST_LOG_LEVEL` / `FARMCAST_LOG_FORMAT`: logging
//! - `RUST_LOG`: overrides everything when set

use clap::Parser;
use farmcast::broker::{serve, AppState, Broker, BrokerConfig};
use farmcast::config::Config;
use farmcast::producer::WeatherSimulator;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "farmcast")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Real-time farm telemetry broker")]
struct Cli {
    /// Path to a TOML config file (default: standard locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print a default config file and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.print_config {
        print!("{}", farmcast::config::generate_default_config());
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };

    init_tracing(&config);

    tracing::info!("Farmcast broker v{}", env!("CARGO_PKG_VERSION"));

    let broker = Arc::new(Broker::new(BrokerConfig {
        max_connections: config.server.max_connections,
        ..Default::default()
    }));

    if config.weather.enabled {
        tracing::info!(
            interval_secs = config.weather.interval_secs,
            "starting weather simulator"
        );
        let simulator = WeatherSimulator::new(Arc::clone(&broker), &config.weather);
        tokio::spawn(simulator.run());
    }

    let state = AppState::new(Arc::clone(&broker), config.server.clone());
    serve(state, &config.server).await?;

    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("farmcast={},tower_http=warn", config.logging.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

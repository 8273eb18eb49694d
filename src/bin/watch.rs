//! Farmcast Watch
//!
//! Connects a multiplexer to a broker and logs every event it receives.
//! Run with: cargo run --bin farmcast-watch -- --url ws://localhost:8080/ws

use clap::Parser;
use farmcast::client::Multiplexer;
use farmcast::config::ClientConfig;
use farmcast::protocol::{MessageKind, Payload};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "farmcast-watch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Watch a farm telemetry stream")]
struct Cli {
    /// Broker WebSocket URL
    #[arg(long, default_value = "ws://127.0.0.1:8080/ws")]
    url: String,

    /// Reconnection attempts before giving up
    #[arg(long, default_value_t = 5)]
    max_reconnect_attempts: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "farmcast=info,farmcast_watch=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = ClientConfig {
        url: cli.url,
        max_reconnect_attempts: cli.max_reconnect_attempts,
        ..Default::default()
    };

    tracing::info!(url = %config.url, "connecting");
    let mux = Multiplexer::connect(config);

    let _weather = mux.subscribe(MessageKind::Weather, |payload| {
        if let Payload::Weather(update) = payload {
            tracing::info!(
                temperature = update.temperature,
                humidity = update.humidity,
                rainfall = update.rainfall,
                forecast = %update.forecast,
                "weather"
            );
        }
    });

    let _alerts = mux.subscribe(MessageKind::CropAlert, |payload| {
        if let Payload::CropAlert(alert) = payload {
            tracing::warn!(
                crop = %alert.crop_type,
                severity = ?alert.severity,
                issues = ?alert.detected_issues,
                "crop alert"
            );
        }
    });

    let _notices = mux.subscribe(MessageKind::SystemNotification, |payload| {
        if let Payload::SystemNotification(note) = payload {
            tracing::info!(message = %note.message, "system notification");
        }
    });

    // Surface link transitions, including terminal failure, until Ctrl-C
    let mut states = mux.watch_state();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                tracing::info!(state = ?state, "link state changed");
                if state == farmcast::client::LinkState::Failed {
                    tracing::error!("link failed permanently, exiting");
                    break;
                }
            }
        }
    }

    mux.disconnect();
    Ok(())
}

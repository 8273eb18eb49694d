//! Simulated Weather Producer
//!
//! Broadcasts a pseudo-random weather update on a fixed interval. Producers
//! hold their own `Arc<Broker>`; the broker knows nothing about them.

use std::sync::Arc;
use std::time::Duration;

use crate::broker::Broker;
use crate::config::WeatherConfig;
use crate::protocol::{Message, Payload, WeatherUpdate};

/// Periodic producer of simulated field readings.
pub struct WeatherSimulator {
    broker: Arc<Broker>,
    interval: Duration,
}

impl WeatherSimulator {
    pub fn new(broker: Arc<Broker>, config: &WeatherConfig) -> Self {
        Self {
            broker,
            interval: Duration::from_secs(config.interval_secs),
        }
    }

    /// Broadcast one update per interval until the broker stops.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        // The first tick fires immediately; skip it so clients connecting at
        // startup see the greeting before any telemetry.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.broker.stopped() => {
                    tracing::debug!("weather simulator stopping");
                    return;
                }
            }

            let update = next_reading();
            tracing::debug!(temperature = update.temperature, "broadcasting weather update");
            self.broker
                .broadcast(&Message::now(Payload::Weather(update)))
                .await;
        }
    }
}

fn next_reading() -> WeatherUpdate {
    WeatherUpdate {
        temperature: 20.0 + rand_simple() * 10.0,
        humidity: 40.0 + rand_simple() * 40.0,
        rainfall: rand_simple() * 5.0,
        wind_speed: rand_simple() * 30.0,
        forecast: "Partly cloudy".to_string(),
    }
}

/// Simple random number generator (0.0 to 1.0)
fn rand_simple() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerConfig;
    use crate::protocol::{decode, MessageKind};
    use tokio::sync::mpsc;

    #[test]
    fn test_readings_stay_in_simulated_ranges() {
        for _ in 0..10 {
            let reading = next_reading();
            assert!((20.0..30.0).contains(&reading.temperature));
            assert!((40.0..80.0).contains(&reading.humidity));
            assert!((0.0..5.0).contains(&reading.rainfall));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulator_broadcasts_on_interval_and_stops_with_broker() {
        let broker = Arc::new(Broker::new(BrokerConfig::default()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        broker.register(tx).await.unwrap();
        rx.try_recv().unwrap(); // greeting

        let simulator = WeatherSimulator::new(
            Arc::clone(&broker),
            &WeatherConfig {
                enabled: true,
                interval_secs: 300,
            },
        );
        let handle = tokio::spawn(simulator.run());

        tokio::time::sleep(Duration::from_secs(301)).await;
        // Paused-clock sleeps only advance once every runnable task has
        // drained, so the broadcast has landed by now.
        tokio::time::sleep(Duration::from_millis(10)).await;

        let frame = rx.try_recv().expect("expected a weather broadcast");
        match frame {
            crate::broker::Frame::Text(text) => {
                assert_eq!(decode(&text).unwrap().kind(), MessageKind::Weather);
            }
            other => panic!("expected text frame, got {:?}", other),
        }

        broker.stop().await;
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("simulator did not stop")
            .unwrap();
    }
}

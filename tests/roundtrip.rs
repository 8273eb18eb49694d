//! End-to-end tests: a live broker served over a real socket, real
//! multiplexers connecting to it.

use std::sync::Arc;
use std::time::Duration;

use farmcast::broker::{build_router, AppState, Broker, BrokerConfig};
use farmcast::client::{LinkState, Multiplexer};
use farmcast::config::{ClientConfig, ServerConfig};
use farmcast::protocol::{
    AlertSeverity, CropAlert, Message, MessageKind, Payload, SystemNotification, WeatherUpdate,
};
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

/// Serve a fresh broker on an ephemeral port; returns the broker and the
/// client URL.
async fn start_broker() -> (Arc<Broker>, String) {
    let broker = Arc::new(Broker::new(BrokerConfig::default()));
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = build_router(AppState::new(Arc::clone(&broker), config));
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (broker, format!("ws://{}/ws", addr))
}

fn client_config(url: &str) -> ClientConfig {
    ClientConfig {
        url: url.to_string(),
        max_reconnect_attempts: 5,
        reconnect_delay_ms: 100,
    }
}

async fn wait_for_state(mux: &Multiplexer, target: LinkState) {
    let mut states = mux.watch_state();
    tokio::time::timeout(WAIT, async {
        while *states.borrow_and_update() != target {
            states.changed().await.unwrap();
        }
    })
    .await
    .unwrap_or_else(|_| panic!("link never reached {:?}", target));
}

async fn wait_for_connections(broker: &Broker, count: usize) {
    tokio::time::timeout(WAIT, async {
        while broker.connection_count().await != count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("broker never reached {} connections", count));
}

/// Subscribe a channel-backed collector for one message kind.
fn collect(mux: &Multiplexer, kind: MessageKind) -> mpsc::UnboundedReceiver<Payload> {
    let (tx, rx) = mpsc::unbounded_channel();
    mux.subscribe(kind, move |payload| {
        let _ = tx.send(payload.clone());
    });
    rx
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<Payload>) -> Payload {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("subscription channel closed")
}

#[tokio::test]
async fn greeting_arrives_first_on_connect() {
    let (_broker, url) = start_broker().await;

    let mux = Multiplexer::connect(client_config(&url));
    let mut notices = collect(&mux, MessageKind::SystemNotification);

    match recv(&mut notices).await {
        Payload::SystemNotification(note) => {
            assert_eq!(note.message, "Connected to farm telemetry stream");
        }
        other => panic!("expected greeting, got {:?}", other),
    }
    assert!(mux.is_connected());

    mux.disconnect();
}

#[tokio::test]
async fn broadcast_reaches_matching_subscriber_only() {
    let (broker, url) = start_broker().await;

    let mux = Multiplexer::connect(client_config(&url));
    let mut weather = collect(&mux, MessageKind::Weather);
    let mut alerts = collect(&mux, MessageKind::CropAlert);

    wait_for_state(&mux, LinkState::Open).await;
    wait_for_connections(&broker, 1).await;

    let update = WeatherUpdate {
        temperature: 21.0,
        humidity: 48.5,
        rainfall: 0.4,
        wind_speed: 11.0,
        forecast: "Sunny spells".to_string(),
    };
    broker
        .broadcast(&Message::with_timestamp(
            Payload::Weather(update.clone()),
            1000,
        ))
        .await;

    match recv(&mut weather).await {
        Payload::Weather(received) => assert_eq!(received, update),
        other => panic!("expected weather, got {:?}", other),
    }

    // The crop alert subscriber saw nothing.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(alerts.try_recv().is_err());

    mux.disconnect();
}

#[tokio::test]
async fn published_crop_alert_is_rebroadcast_to_all_clients() {
    let (broker, url) = start_broker().await;

    let producer = Multiplexer::connect(client_config(&url));
    let consumer = Multiplexer::connect(client_config(&url));
    let mut producer_alerts = collect(&producer, MessageKind::CropAlert);
    let mut consumer_alerts = collect(&consumer, MessageKind::CropAlert);

    wait_for_state(&producer, LinkState::Open).await;
    wait_for_state(&consumer, LinkState::Open).await;
    wait_for_connections(&broker, 2).await;

    let alert = CropAlert {
        crop_type: "wheat".to_string(),
        severity: AlertSeverity::Critical,
        detected_issues: vec!["leaf rust".to_string()],
        recommendations: vec!["apply fungicide".to_string()],
    };
    producer.publish(Payload::CropAlert(alert.clone())).unwrap();

    for rx in [&mut producer_alerts, &mut consumer_alerts] {
        match recv(rx).await {
            Payload::CropAlert(received) => assert_eq!(received, alert),
            other => panic!("expected crop alert, got {:?}", other),
        }
    }

    producer.disconnect();
    consumer.disconnect();
}

#[tokio::test]
async fn dropped_client_does_not_disturb_broadcast() {
    let (broker, url) = start_broker().await;

    let leaving = Multiplexer::connect(client_config(&url));
    let staying = Multiplexer::connect(client_config(&url));
    let mut leaving_weather = collect(&leaving, MessageKind::Weather);
    let mut staying_weather = collect(&staying, MessageKind::Weather);

    wait_for_state(&leaving, LinkState::Open).await;
    wait_for_state(&staying, LinkState::Open).await;
    wait_for_connections(&broker, 2).await;

    leaving.disconnect();
    wait_for_connections(&broker, 1).await;

    let update = WeatherUpdate {
        temperature: 21.0,
        humidity: 50.0,
        rainfall: 0.0,
        wind_speed: 5.0,
        forecast: "Clear".to_string(),
    };
    broker
        .broadcast(&Message::with_timestamp(
            Payload::Weather(update.clone()),
            1000,
        ))
        .await;

    match recv(&mut staying_weather).await {
        Payload::Weather(received) => assert_eq!(received, update),
        other => panic!("expected weather, got {:?}", other),
    }

    // Exactly one delivery to the stayer, none to the leaver.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(staying_weather.try_recv().is_err());
    assert!(leaving_weather.try_recv().is_err());

    staying.disconnect();
}

#[tokio::test]
async fn publish_notice_from_client_is_ignored_by_broker() {
    let (broker, url) = start_broker().await;

    let mux = Multiplexer::connect(client_config(&url));
    let mut notices = collect(&mux, MessageKind::SystemNotification);

    wait_for_state(&mux, LinkState::Open).await;
    wait_for_connections(&broker, 1).await;

    // Drain the greeting, then push a client-originated notification.
    recv(&mut notices).await;
    mux.publish(Payload::SystemNotification(SystemNotification {
        message: "spoofed".to_string(),
    }))
    .unwrap();

    // Server-originated kinds from clients are dropped, never re-broadcast.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(notices.try_recv().is_err());

    mux.disconnect();
}

#[tokio::test]
async fn broker_stop_closes_client_links() {
    let (broker, url) = start_broker().await;

    let mux = Multiplexer::connect(client_config(&url));
    wait_for_state(&mux, LinkState::Open).await;
    wait_for_connections(&broker, 1).await;

    broker.stop().await;
    assert_eq!(broker.connection_count().await, 0);

    // The client observes the close and leaves Open.
    let mut states = mux.watch_state();
    tokio::time::timeout(WAIT, async {
        while *states.borrow_and_update() == LinkState::Open {
            states.changed().await.unwrap();
        }
    })
    .await
    .expect("client never observed the close");

    mux.disconnect();
}

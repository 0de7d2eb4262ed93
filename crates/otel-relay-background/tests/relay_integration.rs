//! Integration tests for the background relay over its WebSocket transport.
//!
//! Each test starts the real accept loop on an ephemeral port, wires a
//! [`Router`] to a recording collector, and talks to it as a bridge would:
//!
//! ```text
//! test client ──Connect──► ws_server ──Port──► Router ──ExportRequest──► RecordingCollector
//!             ◄──StorageChanged───────────────  StorageObserver ◄── ConfigStore::set
//! ```
//!
//! The collector double records into an mpsc channel so tests can await the
//! delivery instead of sleeping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use otel_relay_core::protocol::messages::PORT_NAME;
use otel_relay_core::{
    Configuration, FromBackground, Handshake, SenderInfo, StorageItems, TelemetryKind, ToBackground,
};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use otel_relay_background::application::gate_permissions::PermissionGate;
use otel_relay_background::application::observe_storage::StorageObserver;
use otel_relay_background::application::route_telemetry::{
    CollectorClient, CollectorError, ExportRequest, Router,
};
use otel_relay_background::infrastructure::network::{bind, run_server};
use otel_relay_background::infrastructure::permissions::SettingsPermissions;
use otel_relay_background::infrastructure::storage::settings::PermissionSettings;
use otel_relay_background::infrastructure::storage::store::ConfigStore;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── Test doubles ──────────────────────────────────────────────────────────────

struct RecordingCollector {
    requests: mpsc::UnboundedSender<ExportRequest>,
}

#[async_trait]
impl CollectorClient for RecordingCollector {
    async fn post(&self, request: ExportRequest) -> Result<(), CollectorError> {
        let _ = self.requests.send(request);
        Ok(())
    }
}

// ── Harness ───────────────────────────────────────────────────────────────────

struct Relay {
    url: String,
    store: Arc<ConfigStore>,
    router: Arc<Router>,
    exports: mpsc::UnboundedReceiver<ExportRequest>,
    running: Arc<AtomicBool>,
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

async fn start_relay() -> Relay {
    let store = Arc::new(ConfigStore::seeded(&Configuration::default()).unwrap());
    let (tx, exports) = mpsc::unbounded_channel();
    let router = Router::new(Arc::clone(&store), Arc::new(RecordingCollector { requests: tx }));

    let gate = Arc::new(PermissionGate::new(Arc::new(SettingsPermissions::new(
        &PermissionSettings::default(),
    ))));
    let observer = StorageObserver::new(Arc::clone(&store), Arc::clone(&router), gate);
    tokio::spawn(observer.run(store.subscribe()));

    let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let running = Arc::new(AtomicBool::new(true));
    tokio::spawn(run_server(listener, Arc::clone(&router), Arc::clone(&running)));

    Relay {
        url,
        store,
        router,
        exports,
        running,
    }
}

async fn connect_bridge(relay: &Relay, tab_id: i32, page_url: &str) -> Client {
    let (mut ws, _) = connect_async(relay.url.as_str()).await.unwrap();
    let hello = Handshake::Connect {
        sender: SenderInfo {
            name: PORT_NAME.to_string(),
            tab_id,
            frame_id: 0,
            url: page_url.to_string(),
        },
    };
    ws.send(WsMessage::Text(serde_json::to_string(&hello).unwrap()))
        .await
        .unwrap();
    ws
}

/// Waits until the router has registered `count` channels.
async fn wait_for_registrations(router: &Router, count: usize) {
    timeout(Duration::from_secs(5), async {
        while router.registered().await.len() != count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("channels were not registered in time");
}

async fn next_text(ws: &mut Client, within: Duration) -> Option<String> {
    loop {
        match timeout(within, ws.next()).await {
            Ok(Some(Ok(WsMessage::Text(text)))) => return Some(text),
            Ok(Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_)))) => continue,
            _ => return None,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_matching_page_trace_reaches_collector() {
    // Arrange
    let mut relay = start_relay().await;
    let mut ws = connect_bridge(&relay, 7, "http://localhost/checkout").await;
    wait_for_registrations(&relay.router, 1).await;

    // Act
    let message = ToBackground::telemetry(TelemetryKind::Trace, vec![10, 2, 8, 1], 10_000);
    ws.send(WsMessage::Text(serde_json::to_string(&message).unwrap()))
        .await
        .unwrap();

    // Assert
    let export = timeout(Duration::from_secs(5), relay.exports.recv())
        .await
        .expect("export not delivered in time")
        .expect("collector channel closed");
    assert_eq!(export.kind, TelemetryKind::Trace);
    assert_eq!(export.url, "http://localhost:4318/v1/traces");
    assert_eq!(export.body, vec![10, 2, 8, 1]);
    assert_eq!(export.headers.get("Content-Type"), Some("application/x-protobuf"));
}

#[tokio::test]
async fn test_gated_page_is_never_registered_or_forwarded() {
    // Arrange
    let mut relay = start_relay().await;
    let mut gated = connect_bridge(&relay, 1, "https://not-allowed.example/").await;

    // Act
    let message = ToBackground::telemetry(TelemetryKind::Log, vec![1], 10_000);
    gated
        .send(WsMessage::Text(serde_json::to_string(&message).unwrap()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Assert
    assert!(relay.router.registered().await.is_empty());
    assert!(relay.exports.try_recv().is_err(), "gated telemetry must not be exported");
}

#[tokio::test]
async fn test_storage_change_is_broadcast_only_to_admitted_bridges() {
    // Arrange
    let relay = start_relay().await;
    let mut admitted = connect_bridge(&relay, 2, "http://127.0.0.1/app").await;
    let mut gated = connect_bridge(&relay, 3, "https://elsewhere.example/").await;
    wait_for_registrations(&relay.router, 1).await;

    // Act
    let mut update = StorageItems::new();
    update.insert("enabled".to_string(), json!(false));
    relay.store.set(update).await.unwrap();

    // Assert
    let text = next_text(&mut admitted, Duration::from_secs(5))
        .await
        .expect("admitted bridge received nothing");
    let message: FromBackground = serde_json::from_str(&text).unwrap();
    match message {
        FromBackground::StorageChanged { changes } => {
            assert_eq!(changes.get("enabled"), Some(&json!(false)));
        }
        other => panic!("unexpected message {other:?}"),
    }
    assert!(next_text(&mut gated, Duration::from_millis(200)).await.is_none());
}

#[tokio::test]
async fn test_closing_the_socket_unregisters_the_channel() {
    // Arrange
    let relay = start_relay().await;
    let mut ws = connect_bridge(&relay, 4, "http://localhost/").await;
    wait_for_registrations(&relay.router, 1).await;

    // Act
    ws.close(None).await.unwrap();

    // Assert
    wait_for_registrations(&relay.router, 0).await;
}

#[tokio::test]
async fn test_metric_messages_are_dropped_silently() {
    // Arrange
    let mut relay = start_relay().await;
    let mut ws = connect_bridge(&relay, 5, "http://localhost/").await;
    wait_for_registrations(&relay.router, 1).await;

    // Act
    let metric = ToBackground::telemetry(TelemetryKind::Metric, vec![9], 10_000);
    ws.send(WsMessage::Text(serde_json::to_string(&metric).unwrap()))
        .await
        .unwrap();
    let trace = ToBackground::telemetry(TelemetryKind::Trace, vec![8], 10_000);
    ws.send(WsMessage::Text(serde_json::to_string(&trace).unwrap()))
        .await
        .unwrap();

    // Assert: only the trace arrives and the channel stays open.
    let export = timeout(Duration::from_secs(5), relay.exports.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(export.kind, TelemetryKind::Trace);
    assert_eq!(relay.router.registered().await.len(), 1);
    assert!(next_text(&mut ws, Duration::from_millis(100)).await.is_none());
}

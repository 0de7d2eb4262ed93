//! RouteTelemetry: admits bridge channels and forwards their payloads.
//!
//! This use case is the heart of the background service. For every inbound
//! channel it decides whether the sender may talk to us at all, keeps the
//! [`ChannelRegistry`] current, and turns telemetry messages into collector
//! POSTs.
//!
//! # Connection lifecycle
//!
//! ```text
//!            patterns match          peer disconnects
//! Pending ──────────────────► Accepted ──────────────► Closed
//!    │
//!    └── no match ──► Gated   (port kept open, every frame ignored,
//!                              never registered, never broadcast to)
//! ```
//!
//! # Delivery
//!
//! Telemetry is fire-and-forget. Each message becomes exactly one POST; a
//! failure is logged and the batch is lost. Nothing is ever reported back to
//! the sender.

use std::sync::Arc;

use async_trait::async_trait;
use otel_relay_core::protocol::channel::Channel;
use otel_relay_core::{
    matches, BackendConfiguration, FromBackground, OrderedMap, Port, SenderInfo, StorageItems,
    TelemetryKind, ToBackground,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn, Instrument};

use crate::application::manage_channels::{ChannelKey, ChannelRegistry};
use crate::infrastructure::storage::store::{ConfigStore, StoreError};

/// Media type of encoded OTLP payloads.
pub const PROTOBUF_MEDIA_TYPE: &str = "application/x-protobuf";

/// Error type for the collector seam.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollectorError {
    /// The request never produced a response (DNS, connect, timeout, ...).
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    /// The collector answered with a non-success status.
    #[error("collector at {url} answered {status}")]
    Status { url: String, status: u16 },
}

/// Why a message was not delivered.
#[derive(Debug, Error)]
pub enum RouteError {
    /// The kind exists in the protocol but has no collector destination.
    #[error("{0} messages are not routed")]
    Unrouted(TelemetryKind),

    /// The destination URL for this kind is empty.
    #[error("no collector URL configured for {0} messages")]
    NoDestination(TelemetryKind),

    #[error("stored configuration is unusable: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Collector(#[from] CollectorError),
}

/// One outbound POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    pub kind: TelemetryKind,
    pub url: String,
    pub headers: OrderedMap,
    pub body: Vec<u8>,
}

/// Trait for delivering encoded payloads to a collector.
///
/// The infrastructure implementation uses `reqwest`; tests record requests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CollectorClient: Send + Sync {
    async fn post(&self, request: ExportRequest) -> Result<(), CollectorError>;
}

/// Outcome of [`Router::accept`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Gated,
}

/// Returns the collector URL for `kind`, if that kind is routed at all.
pub fn resolve_destination(config: &BackendConfiguration, kind: TelemetryKind) -> Option<&str> {
    match kind {
        TelemetryKind::Trace => Some(config.trace_collector_url.as_str()),
        TelemetryKind::Log => Some(config.log_collector_url.as_str()),
        TelemetryKind::Metric => None,
    }
}

/// Stored headers first, then the fixed protobuf pair.
///
/// User entries named `Content-Type` or `Accept` in any letter case are
/// dropped so the framing headers can never be altered by configuration.
pub fn merge_headers(stored: &OrderedMap) -> OrderedMap {
    let mut merged: OrderedMap = stored
        .iter()
        .filter(|(name, _)| {
            !name.eq_ignore_ascii_case("content-type") && !name.eq_ignore_ascii_case("accept")
        })
        .collect();
    merged.insert("Content-Type", PROTOBUF_MEDIA_TYPE);
    merged.insert("Accept", PROTOBUF_MEDIA_TYPE);
    merged
}

/// Admits channels, routes telemetry, and broadcasts configuration changes.
pub struct Router {
    store: Arc<ConfigStore>,
    registry: Mutex<ChannelRegistry>,
    collector: Arc<dyn CollectorClient>,
}

impl Router {
    pub fn new(store: Arc<ConfigStore>, collector: Arc<dyn CollectorClient>) -> Arc<Self> {
        Arc::new(Self {
            store,
            registry: Mutex::new(ChannelRegistry::new()),
            collector,
        })
    }

    /// Gates `port` by its sender URL and, if admitted, registers it and
    /// spawns its receive loop.
    pub async fn accept(self: &Arc<Self>, port: Port) -> Admission {
        let sender = port.sender().clone();
        let key = ChannelKey {
            tab_id: sender.tab_id,
            frame_id: sender.frame_id,
        };

        let patterns = match self.store.backend().await {
            Ok(backend) => backend.match_patterns,
            Err(e) => {
                warn!("{key}: cannot read match patterns, gating connection: {e}");
                Vec::new()
            }
        };

        if !matches(&sender.url, &patterns) {
            info!("{key}: gated connection from {}", sender.url);
            tokio::spawn(hold_inert(port));
            return Admission::Gated;
        }

        let connection = port.id();
        let channel: Channel<FromBackground, ToBackground> = Channel::new(port);
        let (tx, mut rx) = channel.split();
        self.registry.lock().await.register(tx);
        info!("{key}: accepted connection {connection} from {}", sender.url);

        let router = Arc::clone(self);
        let span = tracing::info_span!("channel", tab = key.tab_id, frame = key.frame_id);
        tokio::spawn(
            async move {
                while let Some(message) = rx.recv().await {
                    let router = Arc::clone(&router);
                    let sender = sender.clone();
                    tokio::spawn(
                        async move {
                            if let Err(e) = router.handle_message(&sender, message).await {
                                match e {
                                    RouteError::Unrouted(kind) => {
                                        debug!("dropping {kind} message: not routed")
                                    }
                                    other => warn!("telemetry dropped: {other}"),
                                }
                            }
                        }
                        .in_current_span(),
                    );
                }
                let removed = router.registry.lock().await.unregister(key, connection);
                info!("connection {connection} closed (registry entry removed: {removed})");
            }
            .instrument(span),
        );

        Admission::Accepted
    }

    /// Delivers one telemetry message to its collector.
    ///
    /// # Errors
    ///
    /// Returns why the message was not delivered. Callers log the error; it
    /// is never sent back over the channel.
    pub async fn handle_message(
        &self,
        sender: &SenderInfo,
        message: ToBackground,
    ) -> Result<(), RouteError> {
        let kind = message.kind();
        let backend = self.store.backend().await?;

        let url = resolve_destination(&backend, kind).ok_or(RouteError::Unrouted(kind))?;
        if url.is_empty() {
            return Err(RouteError::NoDestination(kind));
        }

        let request = ExportRequest {
            kind,
            url: url.to_string(),
            headers: merge_headers(&backend.headers),
            body: message.into_bytes(),
        };
        debug!(
            tab = sender.tab_id,
            frame = sender.frame_id,
            %kind,
            bytes = request.body.len(),
            "forwarding to {}",
            request.url
        );
        self.collector.post(request).await?;
        Ok(())
    }

    /// Sends `StorageChanged` with `changes` to every registered channel.
    pub async fn broadcast_changes(&self, changes: StorageItems) -> usize {
        let message = FromBackground::StorageChanged { changes };
        let delivered = self.registry.lock().await.broadcast(&message);
        debug!("storage change delivered to {delivered} channel(s)");
        delivered
    }

    /// Keys of the currently registered channels.
    pub async fn registered(&self) -> Vec<ChannelKey> {
        self.registry.lock().await.keys()
    }
}

/// Keeps a gated port open without acting on anything it receives.
async fn hold_inert(mut port: Port) {
    let id = port.id();
    let mut ignored = 0usize;
    while port.recv().await.is_some() {
        ignored += 1;
    }
    debug!("gated connection {id} closed after {ignored} ignored frame(s)");
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use otel_relay_core::Configuration;

    fn sender(url: &str) -> SenderInfo {
        SenderInfo {
            name: "otel-relay".to_string(),
            tab_id: 1,
            frame_id: 0,
            url: url.to_string(),
        }
    }

    fn store_with(config: &Configuration) -> Arc<ConfigStore> {
        Arc::new(ConfigStore::seeded(config).unwrap())
    }

    #[test]
    fn test_destination_by_kind() {
        let config = BackendConfiguration::default();
        assert_eq!(
            resolve_destination(&config, TelemetryKind::Trace),
            Some("http://localhost:4318/v1/traces")
        );
        assert_eq!(
            resolve_destination(&config, TelemetryKind::Log),
            Some("http://localhost:4318/v1/logs")
        );
        assert_eq!(resolve_destination(&config, TelemetryKind::Metric), None);
    }

    #[test]
    fn test_fixed_headers_are_assigned_last() {
        // Arrange
        let stored: OrderedMap = [
            ("content-type", "text/plain"),
            ("Authorization", "Bearer t"),
            ("ACCEPT", "*/*"),
        ]
        .into_iter()
        .collect();

        // Act
        let merged = merge_headers(&stored);

        // Assert
        assert_eq!(
            merged.iter().collect::<Vec<_>>(),
            vec![
                ("Authorization", "Bearer t"),
                ("Content-Type", PROTOBUF_MEDIA_TYPE),
                ("Accept", PROTOBUF_MEDIA_TYPE),
            ]
        );
    }

    #[tokio::test]
    async fn test_trace_message_is_posted_once_with_merged_headers() {
        // Arrange
        let mut config = Configuration::default();
        config.backend.headers = [("x-team", "web")].into_iter().collect();
        let mut collector = MockCollectorClient::new();
        collector
            .expect_post()
            .withf(|req| {
                req.kind == TelemetryKind::Trace
                    && req.url == "http://localhost:4318/v1/traces"
                    && req.body == vec![1, 2, 3]
                    && req.headers.get("x-team") == Some("web")
                    && req.headers.get("Content-Type") == Some(PROTOBUF_MEDIA_TYPE)
            })
            .times(1)
            .returning(|_| Ok(()));
        let router = Router::new(store_with(&config), Arc::new(collector));

        // Act
        let result = router
            .handle_message(
                &sender("http://localhost/"),
                ToBackground::telemetry(TelemetryKind::Trace, vec![1, 2, 3], 10_000),
            )
            .await;

        // Assert
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_metric_message_is_dropped_without_posting() {
        let mut collector = MockCollectorClient::new();
        collector.expect_post().never();
        let router = Router::new(store_with(&Configuration::default()), Arc::new(collector));

        let result = router
            .handle_message(
                &sender("http://localhost/"),
                ToBackground::telemetry(TelemetryKind::Metric, vec![9], 0),
            )
            .await;

        assert!(matches!(result, Err(RouteError::Unrouted(TelemetryKind::Metric))));
    }

    #[tokio::test]
    async fn test_collector_failure_is_returned_not_retried() {
        let mut collector = MockCollectorClient::new();
        collector.expect_post().times(1).returning(|req| {
            Err(CollectorError::Transport {
                url: req.url,
                reason: "connection refused".into(),
            })
        });
        let router = Router::new(store_with(&Configuration::default()), Arc::new(collector));

        let result = router
            .handle_message(
                &sender("http://localhost/"),
                ToBackground::telemetry(TelemetryKind::Log, vec![1], 0),
            )
            .await;

        assert!(matches!(result, Err(RouteError::Collector(_))));
    }

    #[tokio::test]
    async fn test_empty_destination_is_not_posted() {
        let mut config = Configuration::default();
        config.backend.log_collector_url = String::new();
        let mut collector = MockCollectorClient::new();
        collector.expect_post().never();
        let router = Router::new(store_with(&config), Arc::new(collector));

        let result = router
            .handle_message(
                &sender("http://localhost/"),
                ToBackground::telemetry(TelemetryKind::Log, vec![1], 0),
            )
            .await;

        assert!(matches!(result, Err(RouteError::NoDestination(TelemetryKind::Log))));
    }

    #[tokio::test]
    async fn test_non_matching_origin_is_gated_and_not_registered() {
        // Arrange
        let mut collector = MockCollectorClient::new();
        collector.expect_post().never();
        let router = Router::new(store_with(&Configuration::default()), Arc::new(collector));
        let (background, bridge) = Port::pair(sender("https://elsewhere.example/"));

        // Act
        let admission = router.accept(background).await;

        // Assert
        assert_eq!(admission, Admission::Gated);
        assert!(router.registered().await.is_empty());
        assert!(bridge.handle().is_connected(), "gated port stays open");
    }

    #[tokio::test]
    async fn test_matching_origin_is_registered_by_tab_and_frame() {
        let router = Router::new(
            store_with(&Configuration::default()),
            Arc::new(MockCollectorClient::new()),
        );
        let (background, _bridge) = Port::pair(sender("http://localhost:8080/app"));

        let admission = router.accept(background).await;

        assert_eq!(admission, Admission::Accepted);
        assert_eq!(
            router.registered().await,
            vec![ChannelKey { tab_id: 1, frame_id: 0 }]
        );
    }
}

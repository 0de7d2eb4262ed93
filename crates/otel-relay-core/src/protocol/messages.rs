//! All relay protocol message types.
//!
//! Every message is a JSON object with a `"type"` discriminator; the payload
//! shape is fully determined by it. Binary telemetry is carried as an array of
//! numbers (`[10, 2, 255, ...]`) because the structured-clone transports between
//! contexts cannot carry native byte buffers.
//!
//! # Message flow
//!
//! ```text
//! main context → bridge → background:  ToBackground   (OTLP payloads)
//! background → bridge:                 FromBackground (StorageChanged, Disconnect)
//! bridge → main context:               PageMessage    (ConfigurationChanged, Disconnect)
//! ```
//!
//! Using a distinct enum per direction makes it a compile-time error to send a
//! background-bound payload down to a page, and vice versa.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::configuration::ContentPatch;
use crate::protocol::channel::SenderInfo;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Name given to every channel opened by a bridge relay.
pub const PORT_NAME: &str = "otel-relay";

/// Advisory export timeout attached to telemetry messages (milliseconds).
///
/// The background does not enforce it; it is carried for collectors that care.
pub const DEFAULT_EXPORT_TIMEOUT_MS: u64 = 10_000;

/// Suffix of the page event the bridge dispatches towards the main context.
pub const RELAY_FROM_BACKGROUND: &str = "relay-from-background";

/// Suffix of the page event the main context dispatches towards the bridge.
pub const RELAY_TO_BACKGROUND: &str = "relay-to-background";

/// Returns the session-scoped name of the background → page event.
pub fn relay_from_background_event(session_id: &str) -> String {
    format!("{session_id}:{RELAY_FROM_BACKGROUND}")
}

/// Returns the session-scoped name of the page → background event.
pub fn relay_to_background_event(session_id: &str) -> String {
    format!("{session_id}:{RELAY_TO_BACKGROUND}")
}

// ── Telemetry kinds ───────────────────────────────────────────────────────────

/// The signal carried by a background-bound telemetry message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TelemetryKind {
    Trace,
    Log,
    Metric,
}

impl std::fmt::Display for TelemetryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TelemetryKind::Trace => "trace",
            TelemetryKind::Log => "log",
            TelemetryKind::Metric => "metric",
        };
        f.write_str(name)
    }
}

// ── Page → background ─────────────────────────────────────────────────────────

/// Messages travelling towards the background process.
///
/// # Serde representation
///
/// ```json
/// {"type":"OTLPTraceMessage","bytes":[10,3,1,2,3],"timeout":10000}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToBackground {
    /// Encoded `ExportTraceServiceRequest` protobuf.
    #[serde(rename = "OTLPTraceMessage")]
    OtlpTrace { bytes: Vec<u8>, timeout: u64 },

    /// Encoded `ExportLogsServiceRequest` protobuf.
    #[serde(rename = "OTLPLogMessage")]
    OtlpLog { bytes: Vec<u8>, timeout: u64 },

    /// Encoded `ExportMetricsServiceRequest` protobuf.
    ///
    /// Defined so the taxonomy is closed, but the background does not route it.
    #[serde(rename = "OTLPMetricMessage")]
    OtlpMetric { bytes: Vec<u8>, timeout: u64 },
}

impl ToBackground {
    /// Wraps an encoded payload into the message variant for `kind`.
    pub fn telemetry(kind: TelemetryKind, bytes: Vec<u8>, timeout: u64) -> Self {
        match kind {
            TelemetryKind::Trace => ToBackground::OtlpTrace { bytes, timeout },
            TelemetryKind::Log => ToBackground::OtlpLog { bytes, timeout },
            TelemetryKind::Metric => ToBackground::OtlpMetric { bytes, timeout },
        }
    }

    /// Returns the signal this message carries.
    pub fn kind(&self) -> TelemetryKind {
        match self {
            ToBackground::OtlpTrace { .. } => TelemetryKind::Trace,
            ToBackground::OtlpLog { .. } => TelemetryKind::Log,
            ToBackground::OtlpMetric { .. } => TelemetryKind::Metric,
        }
    }

    /// Returns the encoded payload.
    pub fn bytes(&self) -> &[u8] {
        match self {
            ToBackground::OtlpTrace { bytes, .. }
            | ToBackground::OtlpLog { bytes, .. }
            | ToBackground::OtlpMetric { bytes, .. } => bytes,
        }
    }

    /// Consumes the message and returns the encoded payload.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            ToBackground::OtlpTrace { bytes, .. }
            | ToBackground::OtlpLog { bytes, .. }
            | ToBackground::OtlpMetric { bytes, .. } => bytes,
        }
    }
}

// ── Background → bridge ───────────────────────────────────────────────────────

/// Messages the background pushes down to every accepted channel.
///
/// ```json
/// {"type":"StorageChanged","changes":{"enabled":false}}
/// {"type":"Disconnect"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FromBackground {
    /// New values of the storage keys that changed, in storage form.
    StorageChanged { changes: Map<String, Value> },

    /// The background is closing this channel.
    Disconnect,
}

// ── Bridge → main context ─────────────────────────────────────────────────────

/// Detail carried by the `<session>:relay-from-background` page event.
///
/// The bridge reduces [`FromBackground::StorageChanged`] to the keys of the
/// content slice before dispatching, so the main context never sees collector
/// URLs or headers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PageMessage {
    ConfigurationChanged { data: ContentPatch },
    Disconnect,
}

// ── Socket transport handshake ────────────────────────────────────────────────

/// First frame a bridge sends when the channel runs over a socket.
///
/// In a browser the runtime attaches the sender's identity to every port;
/// over a socket the bridge has to declare it before any channel message.
///
/// ```json
/// {"type":"Connect","sender":{"name":"otel-relay","tabId":3,"frameId":0,"url":"https://shop.example/"}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Handshake {
    Connect { sender: SenderInfo },
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_trace_message_bytes_serialize_as_number_array() {
        let msg = ToBackground::telemetry(TelemetryKind::Trace, vec![0, 127, 255], 500);

        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(
            value,
            json!({"type": "OTLPTraceMessage", "bytes": [0, 127, 255], "timeout": 500})
        );
    }

    #[test]
    fn test_log_message_decodes_from_wire_shape() {
        let value = json!({"type": "OTLPLogMessage", "bytes": [1, 2], "timeout": 0});

        let msg: ToBackground = serde_json::from_value(value).unwrap();

        assert_eq!(msg.kind(), TelemetryKind::Log);
        assert_eq!(msg.bytes(), &[1, 2]);
    }

    #[test]
    fn test_byte_values_above_255_are_rejected() {
        let value = json!({"type": "OTLPTraceMessage", "bytes": [256], "timeout": 0});
        assert!(serde_json::from_value::<ToBackground>(value).is_err());
    }

    #[test]
    fn test_unknown_discriminator_is_rejected() {
        let value = json!({"type": "OTLPProfileMessage", "bytes": [], "timeout": 0});
        assert!(serde_json::from_value::<ToBackground>(value).is_err());
    }

    #[test]
    fn test_metric_kind_round_trips_through_constructor() {
        let msg = ToBackground::telemetry(TelemetryKind::Metric, vec![9], 1);
        assert!(matches!(msg, ToBackground::OtlpMetric { .. }));
        assert_eq!(msg.into_bytes(), vec![9]);
    }

    #[test]
    fn test_storage_changed_wire_shape() {
        let mut changes = Map::new();
        changes.insert("enabled".to_string(), json!(false));
        let msg = FromBackground::StorageChanged { changes };

        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value, json!({"type": "StorageChanged", "changes": {"enabled": false}}));
    }

    #[test]
    fn test_disconnect_has_only_discriminator() {
        assert_eq!(
            serde_json::to_value(FromBackground::Disconnect).unwrap(),
            json!({"type": "Disconnect"})
        );
        assert_eq!(
            serde_json::to_value(PageMessage::Disconnect).unwrap(),
            json!({"type": "Disconnect"})
        );
    }

    #[test]
    fn test_connect_handshake_wire_shape() {
        let hello = Handshake::Connect {
            sender: SenderInfo {
                name: PORT_NAME.to_string(),
                tab_id: 3,
                frame_id: 0,
                url: "https://shop.example/".to_string(),
            },
        };

        assert_eq!(
            serde_json::to_value(&hello).unwrap(),
            json!({
                "type": "Connect",
                "sender": {
                    "name": "otel-relay",
                    "tabId": 3,
                    "frameId": 0,
                    "url": "https://shop.example/"
                }
            })
        );
    }

    #[test]
    fn test_page_event_names_are_session_scoped() {
        assert_eq!(
            relay_from_background_event("abc"),
            "abc:relay-from-background"
        );
        assert_eq!(relay_to_background_event("abc"), "abc:relay-to-background");
    }
}

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::event_type::EventType;
use crate::payload::EventPayload;

/// The immutable event envelope.
///
/// `payload` stays typed in memory; the store serializes it next to the
/// `type` column and recombines on read.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Time-ordered, globally unique id.
    pub id: String,
    pub session_id: String,
    pub workspace_id: String,
    /// Previous event in the same session; `None` for a root, and for a
    /// fork root it points at an event in the donor session.
    pub parent_id: Option<String>,
    /// Strictly monotonic per-session sequence, starting at 1.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    /// Wire representation: envelope fields plus the untagged payload.
    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "sessionId": self.session_id,
            "workspaceId": self.workspace_id,
            "parentId": self.parent_id,
            "sequence": self.sequence,
            "timestamp": self.timestamp.to_rfc3339(),
            "type": self.event_type().as_str(),
            "payload": self.payload.to_value().unwrap_or(serde_json::Value::Null),
        })
    }
}

/// Wire-shape envelope used where the payload is passed through opaquely
/// (RPC responses, notifications).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEvent {
    pub id: String,
    pub session_id: String,
    pub workspace_id: String,
    pub parent_id: Option<String>,
    pub sequence: u64,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub payload: serde_json::Value,
}

static ID_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Mint a new event id: `evt_<millis13>_<counter6>_<rand4>`.
///
/// Zero-padded millis plus a wrapping per-process counter keep
/// lexicographic order aligned with creation order, which `get_since`
/// cursors rely on.
pub fn new_event_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed) % 1_000_000;
    let suffix: u16 = rand::thread_rng().gen();
    format!("evt_{millis:013}_{counter:06}_{suffix:04x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_ordered() {
        let a = new_event_id();
        let b = new_event_id();
        assert_ne!(a, b);
        // Same-millisecond ids order by counter.
        assert!(a < b, "{a} should sort before {b}");
    }

    #[test]
    fn id_shape() {
        let id = new_event_id();
        assert!(id.starts_with("evt_"));
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[1].len(), 13);
        assert_eq!(parts[2].len(), 6);
        assert_eq!(parts[3].len(), 4);
    }

    #[test]
    fn wire_event_round_trips() {
        let wire = WireEvent {
            id: "evt_x".into(),
            session_id: "s1".into(),
            workspace_id: "w1".into(),
            parent_id: None,
            sequence: 1,
            timestamp: "2025-01-01T00:00:00Z".into(),
            event_type: EventType::SessionStart,
            payload: serde_json::json!({"workingDirectory": "/tmp", "model": "m"}),
        };
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["type"], "session.start");
        assert_eq!(json["sessionId"], "s1");
        let back: WireEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.event_type, EventType::SessionStart);
    }
}

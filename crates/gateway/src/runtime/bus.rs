//! Per-session streaming fan-out.
//!
//! Each active session owns a broadcast channel of [`Notification`]s.
//! Buffers are bounded: a subscriber that falls behind loses its oldest
//! buffered items and is told so (the WS layer sends a
//! `subscriber.behind` marker); it resyncs via `events.getSince`.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// A server-originated push frame.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: String,
    pub session_id: String,
    pub timestamp: String,
    pub data: Value,
}

impl Notification {
    pub fn new(kind: &str, session_id: &str, data: Value) -> Self {
        Self {
            kind: kind.to_owned(),
            session_id: session_id.to_owned(),
            timestamp: Utc::now().to_rfc3339(),
            data,
        }
    }
}

/// One session's fan-out channel.
#[derive(Clone)]
pub struct SessionBus {
    tx: broadcast::Sender<Notification>,
}

impl SessionBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(8));
        Self { tx }
    }

    /// Best-effort delivery; having no subscribers is not an error.
    pub fn publish(&self, notification: Notification) {
        let _ = self.tx.send(notification);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let bus = SessionBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(Notification::new(
            "stream.text_delta",
            "s1",
            serde_json::json!({"text": "hi"}),
        ));

        assert_eq!(a.recv().await.unwrap().kind, "stream.text_delta");
        assert_eq!(b.recv().await.unwrap().kind, "stream.text_delta");
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let bus = SessionBus::new(8);
        let mut rx = bus.subscribe();

        // Overrun the buffer without the subscriber draining.
        for i in 0..64 {
            bus.publish(Notification::new(
                "stream.text_delta",
                "s1",
                serde_json::json!({"i": i}),
            ));
        }

        // The first recv reports the lag; the stream then resumes from
        // the oldest retained item.
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                assert!(missed > 0);
            }
            other => panic!("expected Lagged, got {other:?}"),
        }
        let next = rx.recv().await.unwrap();
        assert_eq!(next.kind, "stream.text_delta");
    }

    #[test]
    fn notification_wire_shape() {
        let n = Notification::new("stream.turn_start", "sess_1", serde_json::json!({"turn": 1}));
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["type"], "stream.turn_start");
        assert_eq!(json["sessionId"], "sess_1");
        assert!(json["timestamp"].is_string());
        assert_eq!(json["data"]["turn"], 1);
    }
}

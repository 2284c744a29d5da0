// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! Event bus for inter-component communication

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use crate::camera::CameraHealth;
use crate::events::Event;

/// Kinds of bus messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Detection,
    Health,
    Alert,
}

/// Envelope carried on the combined feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    pub id: u64,
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
    pub payload: BusPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum BusPayload {
    Event(Event),
    Health(CameraHealth),
    Alert { level: String, message: String },
}

/// Central event bus for pub/sub communication
pub struct EventBus {
    event_tx: broadcast::Sender<Event>,
    health_tx: broadcast::Sender<CameraHealth>,
    message_tx: broadcast::Sender<BusMessage>,
    counter: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity);
        let (health_tx, _) = broadcast::channel(capacity);
        let (message_tx, _) = broadcast::channel(capacity);

        Self {
            event_tx,
            health_tx,
            message_tx,
            counter: AtomicU64::new(0),
        }
    }

    pub fn publish_event(&self, event: Event) {
        let _ = self.event_tx.send(event.clone());
        self.publish(MessageKind::Detection, BusPayload::Event(event));
    }

    pub fn publish_health(&self, health: CameraHealth) {
        let _ = self.health_tx.send(health.clone());
        self.publish(MessageKind::Health, BusPayload::Health(health));
    }

    pub fn publish_alert(&self, level: &str, message: &str) {
        self.publish(
            MessageKind::Alert,
            BusPayload::Alert {
                level: level.to_string(),
                message: message.to_string(),
            },
        );
    }

    fn publish(&self, kind: MessageKind, payload: BusPayload) {
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        let message = BusMessage {
            id,
            kind,
            timestamp: Utc::now(),
            payload,
        };
        let _ = self.message_tx.send(message);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    pub fn subscribe_health(&self) -> broadcast::Receiver<CameraHealth> {
        self.health_tx.subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<BusMessage> {
        self.message_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::HealthStatus;

    #[tokio::test]
    async fn test_health_reaches_both_feeds() {
        let bus = EventBus::new(16);
        let mut health_rx = bus.subscribe_health();
        let mut all_rx = bus.subscribe_all();

        let mut health = CameraHealth::new("cam-1");
        health.status = HealthStatus::Online;
        bus.publish_health(health);

        assert_eq!(health_rx.recv().await.unwrap().status, HealthStatus::Online);
        let message = all_rx.recv().await.unwrap();
        assert_eq!(message.kind, MessageKind::Health);
        assert_eq!(message.id, 0);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        bus.publish_alert("warning", "disk almost full");
        bus.publish_alert("warning", "disk almost full");
    }

    #[test]
    fn test_message_json_shape() {
        let message = BusMessage {
            id: 3,
            kind: MessageKind::Alert,
            timestamp: Utc::now(),
            payload: BusPayload::Alert {
                level: "error".into(),
                message: "camera lost".into(),
            },
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["kind"], "alert");
        assert_eq!(json["payload"]["type"], "alert");
        assert_eq!(json["payload"]["data"]["message"], "camera lost");
    }
}

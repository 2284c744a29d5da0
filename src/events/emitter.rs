// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! Event emitter - detections to stored, published events

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::snapshot::{JpegSnapshotter, SnapshotCapture};
use super::window::{Correlation, CorrelationTracker};
use super::{Event, EventsConfig};
use crate::camera::Camera;
use crate::core::EventBus;
use crate::inference::{event_type_for, Detection};
use crate::storage::EventSink;
use crate::stream::Frame;

/// Emission counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmitterStats {
    pub created: u64,
    pub stored: u64,
    pub dropped: u64,
    pub snapshot_failures: u64,
}

/// One frame's new events, waiting for the camera's writer
type Batch = (Vec<Event>, Frame);

pub struct EventEmitter {
    config: EventsConfig,
    tracker: Mutex<CorrelationTracker>,
    writers: Mutex<HashMap<String, mpsc::UnboundedSender<Batch>>>,
    sink: Arc<dyn EventSink>,
    snapshots: Option<Arc<dyn SnapshotCapture>>,
    bus: Arc<EventBus>,
    created: AtomicU64,
    stored: AtomicU64,
    dropped: AtomicU64,
    snapshot_failures: AtomicU64,
}

impl EventEmitter {
    pub fn new(config: EventsConfig, sink: Arc<dyn EventSink>, bus: Arc<EventBus>) -> Self {
        let snapshots: Option<Arc<dyn SnapshotCapture>> = if config.snapshots {
            Some(Arc::new(JpegSnapshotter::new(config.snapshot_quality)))
        } else {
            None
        };

        Self {
            config,
            tracker: Mutex::new(CorrelationTracker::new()),
            writers: Mutex::new(HashMap::new()),
            sink,
            snapshots,
            bus,
            created: AtomicU64::new(0),
            stored: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            snapshot_failures: AtomicU64::new(0),
        }
    }

    pub fn with_snapshotter(mut self, capture: Arc<dyn SnapshotCapture>) -> Self {
        self.snapshots = Some(capture);
        self
    }

    fn window_for(&self, camera: &Camera) -> Duration {
        Duration::from_millis(camera.correlation_window_ms.unwrap_or(self.config.correlation_window_ms))
    }

    /// Turn one frame's detections into new events.
    ///
    /// Detections below the camera threshold or outside its event filter are
    /// ignored. Per class, the most confident detection is correlated; only
    /// one that opens a window produces an event.
    pub fn process(&self, camera: &Camera, detections: &[Detection]) -> Vec<Event> {
        let qualifying: Vec<&Detection> = detections
            .iter()
            .filter(|d| {
                let event_type = event_type_for(&d.class_name);
                camera.accepts(event_type) && d.confidence >= camera.threshold_for(&d.class_name, event_type)
            })
            .collect();

        if qualifying.is_empty() {
            return Vec::new();
        }

        let mut best: HashMap<&str, &Detection> = HashMap::new();
        for d in &qualifying {
            let slot = best.entry(d.class_name.as_str()).or_insert(*d);
            if d.confidence > slot.confidence {
                *slot = *d;
            }
        }

        let mut leaders: Vec<&Detection> = best.into_values().collect();
        leaders.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let window = self.window_for(camera);
        let detected_objects: Vec<Detection> = qualifying.iter().map(|d| (*d).clone()).collect();
        let mut tracker = self.tracker.lock();
        let mut events = Vec::new();

        for d in leaders {
            match tracker.observe(&camera.id, &d.class_name, d.timestamp, window) {
                Correlation::Opened(window_id) => {
                    events.push(Event {
                        id: Uuid::new_v4(),
                        camera_id: camera.id.clone(),
                        event_type: event_type_for(&d.class_name),
                        class_name: d.class_name.clone(),
                        confidence: d.confidence,
                        bbox: d.bbox,
                        timestamp: d.timestamp,
                        sequence: d.sequence,
                        window_id,
                        snapshot: None,
                        detected_objects: detected_objects.clone(),
                    });
                }
                Correlation::Continued(window_id) => {
                    debug!(camera = %camera.id, class = %d.class_name, window = %window_id, "Folded into open window");
                }
            }
        }

        self.created.fetch_add(events.len() as u64, Ordering::Relaxed);
        events
    }

    /// Attach a snapshot, write with retry and publish. Returns whether the sink accepted it.
    pub async fn emit(&self, mut event: Event, frame: &Frame) -> bool {
        if let Some(capture) = &self.snapshots {
            event.snapshot = match capture.capture(frame, &event.detected_objects).await {
                Ok(jpeg) => match self.sink.write_snapshot(event.id, &event.camera_id, &jpeg).await {
                    Ok(reference) => Some(reference),
                    Err(e) => {
                        self.snapshot_failures.fetch_add(1, Ordering::Relaxed);
                        warn!(camera = %event.camera_id, event = %event.id, kind = e.kind(), "Snapshot not stored: {}", e);
                        None
                    }
                },
                Err(e) => {
                    self.snapshot_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(camera = %event.camera_id, event = %event.id, "Snapshot capture failed: {}", e);
                    None
                }
            };
        }

        let stored = self
            .config
            .retry
            .run("event write", || self.sink.write_event(&event))
            .await;

        let ok = match stored {
            Ok(()) => {
                self.stored.fetch_add(1, Ordering::Relaxed);
                info!(
                    camera = %event.camera_id,
                    event = %event.id,
                    "Event: {} ({:.2})",
                    event.event_type,
                    event.confidence
                );
                true
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                error!(
                    camera = %event.camera_id,
                    event = %event.id,
                    kind = e.kind(),
                    "Event dropped after {} retries: {}",
                    self.config.retry.retries(),
                    e
                );
                false
            }
        };

        self.bus.publish_event(event);
        ok
    }

    /// Process a frame's detections and queue the resulting events.
    ///
    /// Each camera has one background writer, so its events reach the sink
    /// and the bus in the order they were created.
    pub fn submit(self: &Arc<Self>, camera: &Camera, frame: &Frame, detections: &[Detection]) {
        let events = self.process(camera, detections);
        if events.is_empty() {
            return;
        }

        let count = events.len() as u64;
        if self.writer(&camera.id).send((events, frame.clone())).is_err() {
            self.dropped.fetch_add(count, Ordering::Relaxed);
            warn!(camera = %camera.id, "Event writer gone, {} event(s) dropped", count);
        }
    }

    fn writer(self: &Arc<Self>, camera_id: &str) -> mpsc::UnboundedSender<Batch> {
        let mut writers = self.writers.lock();
        if let Some(tx) = writers.get(camera_id) {
            if !tx.is_closed() {
                return tx.clone();
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(Arc::downgrade(self), camera_id.to_string(), rx));
        writers.insert(camera_id.to_string(), tx.clone());
        tx
    }

    /// Drop correlation state and the writer. Queued events are still written.
    pub fn forget_camera(&self, camera_id: &str) {
        self.tracker.lock().forget_camera(camera_id);
        self.writers.lock().remove(camera_id);
    }

    pub fn stats(&self) -> EmitterStats {
        EmitterStats {
            created: self.created.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            snapshot_failures: self.snapshot_failures.load(Ordering::Relaxed),
        }
    }
}

async fn write_loop(emitter: Weak<EventEmitter>, camera_id: String, mut rx: mpsc::UnboundedReceiver<Batch>) {
    while let Some((events, frame)) = rx.recv().await {
        let Some(emitter) = emitter.upgrade() else {
            break;
        };
        for event in events {
            emitter.emit(event, &frame).await;
        }
    }
    debug!(camera = %camera_id, "Event writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use image::RgbImage;
    use crate::events::EventType;
    use crate::inference::BoundingBox;
    use crate::storage::MemoryStore;

    fn detection(class: &str, confidence: f32, ms: i64) -> Detection {
        Detection {
            class_name: class.into(),
            confidence,
            bbox: BoundingBox::new(1.0, 1.0, 4.0, 4.0),
            camera_id: "cam".into(),
            sequence: ms as u64,
            timestamp: Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap(),
        }
    }

    fn emitter(store: Arc<MemoryStore>) -> EventEmitter {
        EventEmitter::new(EventsConfig::default(), store, Arc::new(EventBus::new(64)))
    }

    fn frame() -> Frame {
        Frame::new("cam", RgbImage::new(16, 16))
    }

    struct FailingCapture;

    #[async_trait]
    impl SnapshotCapture for FailingCapture {
        async fn capture(&self, _frame: &Frame, _detections: &[Detection]) -> anyhow::Result<Vec<u8>> {
            Err(anyhow!("encoder out of memory"))
        }
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let e = emitter(Arc::new(MemoryStore::new()));
        let camera = Camera::new("cam", "stub://cam").with_threshold("person", 0.6);

        assert!(e.process(&camera, &[detection("person", 0.59, 0)]).is_empty());
        let events = e.process(&camera, &[detection("person", 0.6, 0)]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Person);
    }

    #[test]
    fn test_threshold_lookup_order() {
        let e = emitter(Arc::new(MemoryStore::new()));
        let camera = Camera::new("cam", "stub://cam")
            .with_threshold("vehicle", 0.8)
            .with_threshold("truck", 0.3);

        // class label beats event type
        assert_eq!(e.process(&camera, &[detection("truck", 0.4, 0)]).len(), 1);
        // event type beats default
        assert!(e.process(&camera, &[detection("car", 0.7, 0)]).is_empty());
        // default 0.5
        assert_eq!(e.process(&camera, &[detection("dog", 0.5, 0)]).len(), 1);
    }

    #[test]
    fn test_event_type_filter() {
        let e = emitter(Arc::new(MemoryStore::new()));
        let camera = Camera::new("cam", "stub://cam").with_event_types(vec![EventType::Vehicle]);

        assert!(e.process(&camera, &[detection("person", 0.99, 0)]).is_empty());
        assert_eq!(e.process(&camera, &[detection("bus", 0.9, 0)]).len(), 1);
    }

    #[test]
    fn test_one_event_per_class_per_frame() {
        let e = emitter(Arc::new(MemoryStore::new()));
        let camera = Camera::new("cam", "stub://cam");

        let events = e.process(
            &camera,
            &[
                detection("person", 0.7, 0),
                detection("person", 0.9, 0),
                detection("car", 0.6, 0),
                detection("cat", 0.2, 0),
            ],
        );

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].class_name, "person");
        assert_eq!(events[0].confidence, 0.9);
        assert_eq!(events[0].detected_objects.len(), 3);
        assert_eq!(events[1].class_name, "car");
    }

    #[test]
    fn test_constant_stream_three_events() {
        let e = emitter(Arc::new(MemoryStore::new()));
        let camera = Camera::new("cam", "stub://cam");

        let total: usize = (0..60)
            .map(|i| e.process(&camera, &[detection("person", 0.9, i * 500)]).len())
            .sum();
        assert_eq!(total, 3);
        assert_eq!(e.stats().created, 3);
    }

    #[test]
    fn test_camera_window_override() {
        let e = emitter(Arc::new(MemoryStore::new()));
        let camera = Camera::new("cam", "stub://cam").with_correlation_window(Duration::from_secs(2));

        let total: usize = (0..10)
            .map(|i| e.process(&camera, &[detection("person", 0.9, i * 1000)]).len())
            .sum();
        assert_eq!(total, 5);
    }

    #[tokio::test]
    async fn test_emit_stores_snapshot_and_event() {
        let store = Arc::new(MemoryStore::new());
        let e = emitter(store.clone());
        let mut rx = e.bus.subscribe_events();
        let camera = Camera::new("cam", "stub://cam");

        let event = e.process(&camera, &[detection("person", 0.9, 0)]).remove(0);
        assert!(e.emit(event.clone(), &frame()).await);

        let stored = store.events();
        assert_eq!(stored.len(), 1);
        let snapshot = stored[0].snapshot.clone().unwrap();
        assert!(snapshot.size_bytes > 0);
        assert!(store.snapshot(event.id).is_some());
        assert_eq!(rx.recv().await.unwrap().id, event.id);
    }

    #[tokio::test]
    async fn test_snapshot_failure_keeps_event() {
        let store = Arc::new(MemoryStore::new());
        let e = emitter(store.clone()).with_snapshotter(Arc::new(FailingCapture));
        let camera = Camera::new("cam", "stub://cam");

        let event = e.process(&camera, &[detection("person", 0.9, 0)]).remove(0);
        assert!(e.emit(event, &frame()).await);

        assert_eq!(store.events()[0].snapshot, None);
        assert_eq!(e.stats().snapshot_failures, 1);

        // sink-side snapshot failure behaves the same
        store.fail_snapshots(true);
        let e = emitter(store.clone());
        let event = e.process(&camera, &[detection("person", 0.9, 0)]).remove(0);
        assert!(e.emit(event, &frame()).await);
        assert_eq!(store.events()[1].snapshot, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_retries_then_succeeds() {
        let store = Arc::new(MemoryStore::new());
        store.fail_writes(2);
        let e = emitter(store.clone());
        let camera = Camera::new("cam", "stub://cam");

        let started = tokio::time::Instant::now();
        let event = e.process(&camera, &[detection("person", 0.9, 0)]).remove(0);
        assert!(e.emit(event, &frame()).await);

        assert_eq!(store.events().len(), 1);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retried_write_keeps_camera_order() {
        let store = Arc::new(MemoryStore::new());
        store.fail_writes(1);
        let e = Arc::new(emitter(store.clone()));
        let mut rx = e.bus.subscribe_events();
        let camera = Camera::new("cam", "stub://cam");

        e.submit(&camera, &frame(), &[detection("person", 0.9, 0)]);
        e.submit(&camera, &frame(), &[detection("car", 0.9, 200)]);
        tokio::time::sleep(Duration::from_secs(10)).await;

        let classes: Vec<String> = store.events().into_iter().map(|ev| ev.class_name).collect();
        assert_eq!(classes, vec!["person", "car"]);
        assert_eq!(rx.recv().await.unwrap().class_name, "person");
        assert_eq!(rx.recv().await.unwrap().class_name, "car");
        assert_eq!(e.stats().stored, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forget_camera_still_writes_queued_events() {
        let store = Arc::new(MemoryStore::new());
        store.fail_writes(1);
        let e = Arc::new(emitter(store.clone()));
        let camera = Camera::new("cam", "stub://cam");

        e.submit(&camera, &frame(), &[detection("person", 0.9, 0)]);
        e.forget_camera("cam");
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.events().len(), 1);

        // a fresh writer picks up after the old one is gone
        e.submit(&camera, &frame(), &[detection("person", 0.9, 100)]);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(store.events().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_exhaustion_drops_event() {
        let store = Arc::new(MemoryStore::new());
        store.fail_writes(10);
        let e = emitter(store.clone());
        let camera = Camera::new("cam", "stub://cam");

        let event = e.process(&camera, &[detection("person", 0.9, 0)]).remove(0);
        assert!(!e.emit(event, &frame()).await);

        assert!(store.events().is_empty());
        assert_eq!(e.stats().dropped, 1);
        assert_eq!(store.write_attempts(), 4);
    }
}

// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! Live broadcast hub - per-camera fan-out of frames to viewers

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

use super::LiveConfig;
use crate::inference::Detection;
use crate::stream::Frame;

/// What a subscriber receives per published frame
#[derive(Debug, Clone)]
pub struct LiveFrame {
    pub frame: Frame,
    /// Latest detections for the camera, only for overlay subscribers
    pub detections: Option<Arc<Vec<Detection>>>,
}

/// Receiving end of a hub subscription
pub struct Subscription {
    id: u64,
    camera_id: String,
    rx: mpsc::Receiver<LiveFrame>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    /// Next frame. `None` once the hub has dropped this subscriber.
    pub async fn recv(&mut self) -> Option<LiveFrame> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<LiveFrame> {
        self.rx.try_recv().ok()
    }
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<LiveFrame>,
    overlay: bool,
    missed: u32,
}

/// Fan-out with a bounded buffer per subscriber.
///
/// `publish` never waits: a subscriber that stays full for `max_missed`
/// consecutive frames is dropped, as is one whose receiver is gone.
pub struct BroadcastHub {
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
    overlays: Mutex<HashMap<String, Arc<Vec<Detection>>>>,
    next_id: AtomicU64,
    buffer: usize,
    max_missed: u32,
    evicted: AtomicU64,
}

impl BroadcastHub {
    pub fn new(config: &LiveConfig) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            overlays: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: config.subscriber_buffer.max(1),
            max_missed: config.max_missed.max(1),
            evicted: AtomicU64::new(0),
        }
    }

    /// Register a viewer. Works whether or not the camera is currently streaming.
    pub fn subscribe(&self, camera_id: &str, overlay: bool) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);

        self.subscribers
            .lock()
            .entry(camera_id.to_string())
            .or_default()
            .push(Subscriber {
                id,
                tx,
                overlay,
                missed: 0,
            });

        debug!(camera = %camera_id, subscriber = id, "Live subscriber added");
        Subscription {
            id,
            camera_id: camera_id.to_string(),
            rx,
        }
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut subscribers = self.subscribers.lock();
        let camera_id = subscribers
            .iter()
            .find(|(_, list)| list.iter().any(|s| s.id == id))
            .map(|(camera_id, _)| camera_id.clone());

        let Some(camera_id) = camera_id else {
            return false;
        };
        if let Some(list) = subscribers.get_mut(&camera_id) {
            list.retain(|s| s.id != id);
            if list.is_empty() {
                subscribers.remove(&camera_id);
            }
        }
        true
    }

    pub fn publish(&self, camera_id: &str, frame: Frame) {
        let overlay = self.overlays.lock().get(camera_id).cloned();
        let mut subscribers = self.subscribers.lock();
        let list = match subscribers.get_mut(camera_id) {
            Some(list) if !list.is_empty() => list,
            _ => return,
        };

        let max_missed = self.max_missed;
        let mut evicted = 0u64;
        list.retain_mut(|sub| {
            let live = LiveFrame {
                frame: frame.clone(),
                detections: if sub.overlay { overlay.clone() } else { None },
            };
            match sub.tx.try_send(live) {
                Ok(()) => {
                    sub.missed = 0;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    sub.missed += 1;
                    if sub.missed >= max_missed {
                        info!(camera = %camera_id, subscriber = sub.id, "Dropping slow live subscriber");
                        evicted += 1;
                        false
                    } else {
                        true
                    }
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });

        if list.is_empty() {
            subscribers.remove(camera_id);
        }
        if evicted > 0 {
            self.evicted.fetch_add(evicted, Ordering::Relaxed);
        }
    }

    /// Cameras with at least one subscriber
    pub fn watched_cameras(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Latest detections for the camera, drawn for overlay subscribers
    pub fn post_detections(&self, camera_id: &str, detections: Vec<Detection>) {
        self.overlays.lock().insert(camera_id.to_string(), Arc::new(detections));
    }

    /// Forget per-camera state when a camera stops. Subscribers stay registered.
    pub fn remove_camera(&self, camera_id: &str) {
        self.overlays.lock().remove(camera_id);
    }

    pub fn subscriber_count(&self, camera_id: &str) -> usize {
        self.subscribers.lock().get(camera_id).map_or(0, |l| l.len())
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! Detection events - thresholds, correlation windows, snapshots and emission

mod emitter;
mod snapshot;
mod window;

pub use emitter::{EmitterStats, EventEmitter};
pub use snapshot::{draw_detections, JpegSnapshotter, SnapshotCapture};
pub use window::{Correlation, CorrelationTracker};

use std::fmt;
use std::str::FromStr;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::RetryPolicy;
use crate::inference::{BoundingBox, Detection};

/// Event category derived from the detector class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Person,
    Vehicle,
    Animal,
    Custom,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Person => "person",
            EventType::Vehicle => "vehicle",
            EventType::Animal => "animal",
            EventType::Custom => "custom",
        }
    }

    /// Overlay colour
    pub fn color(&self) -> [u8; 3] {
        match self {
            EventType::Person => [255, 64, 64],
            EventType::Vehicle => [64, 160, 255],
            EventType::Animal => [64, 220, 96],
            EventType::Custom => [255, 200, 0],
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "person" => Ok(EventType::Person),
            "vehicle" => Ok(EventType::Vehicle),
            "animal" => Ok(EventType::Animal),
            "custom" => Ok(EventType::Custom),
            other => Err(format!("unknown event type: {}", other)),
        }
    }
}

/// Where a stored snapshot lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRef {
    pub path: String,
    pub size_bytes: u64,
}

/// A detection event. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub camera_id: String,
    pub event_type: EventType,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
    /// Correlation window this event opened
    pub window_id: Uuid,
    pub snapshot: Option<SnapshotRef>,
    /// Every qualifying detection in the frame
    pub detected_objects: Vec<Detection>,
}

/// Event emitter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Default correlation window, overridable per camera
    pub correlation_window_ms: u64,
    pub snapshots: bool,
    pub snapshot_quality: u8,
    /// Sink write retry schedule
    pub retry: RetryPolicy,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            correlation_window_ms: 10_000,
            snapshots: true,
            snapshot_quality: 85,
            retry: RetryPolicy::default(),
        }
    }
}

// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! Camera records, health reporting and the camera catalog

mod catalog;

pub use catalog::{CameraCatalog, CameraChange, InMemoryCatalog};

use std::collections::HashMap;
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::EventType;

/// A configured camera as supplied by the camera catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// Connection URI (`rtsp://`, `http://`, file path or `stub://`)
    pub uri: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Confidence threshold per class label or event type name
    #[serde(default)]
    pub thresholds: HashMap<String, f32>,

    /// Threshold for classes with no entry in `thresholds`
    #[serde(default = "default_threshold")]
    pub default_threshold: f32,

    /// Minimum time between two inference admissions for this camera
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Restrict events to these types. `None` accepts every type.
    #[serde(default)]
    pub event_types: Option<Vec<EventType>>,

    /// Overrides the global correlation window
    #[serde(default)]
    pub correlation_window_ms: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

fn default_threshold() -> f32 {
    0.5
}

fn default_interval_ms() -> u64 {
    1000
}

impl Camera {
    pub fn new(id: &str, uri: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            uri: uri.to_string(),
            enabled: true,
            thresholds: HashMap::new(),
            default_threshold: default_threshold(),
            interval_ms: default_interval_ms(),
            event_types: None,
            correlation_window_ms: None,
        }
    }

    pub fn with_threshold(mut self, class: &str, threshold: f32) -> Self {
        self.thresholds.insert(class.to_string(), threshold);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_event_types(mut self, types: Vec<EventType>) -> Self {
        self.event_types = Some(types);
        self
    }

    pub fn with_correlation_window(mut self, window: Duration) -> Self {
        self.correlation_window_ms = Some(window.as_millis() as u64);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Threshold lookup: class label first, then event type, then the camera default
    pub fn threshold_for(&self, class: &str, event_type: EventType) -> f32 {
        self.thresholds
            .get(class)
            .or_else(|| self.thresholds.get(event_type.as_str()))
            .copied()
            .unwrap_or(self.default_threshold)
    }

    /// Whether events of this type are wanted for this camera
    pub fn accepts(&self, event_type: EventType) -> bool {
        match &self.event_types {
            Some(types) => types.contains(&event_type),
            None => true,
        }
    }

    /// True when switching from `self` to `other` requires a new connection
    pub fn needs_reconnect(&self, other: &Camera) -> bool {
        self.uri != other.uri
    }
}

/// Health status as reported to the surrounding system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Connecting,
    Online,
    Offline,
    Error,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Connecting => "connecting",
            HealthStatus::Online => "online",
            HealthStatus::Offline => "offline",
            HealthStatus::Error => "error",
        }
    }
}

/// Health metrics for one camera stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraHealth {
    pub camera_id: String,
    pub status: HealthStatus,
    pub last_error: Option<String>,
    pub last_frame_at: Option<DateTime<Utc>>,
    pub frames_received: u64,
    pub error_count: u64,
    pub reconnect_count: u64,
    pub fps_actual: f32,
    pub connected_since: Option<DateTime<Utc>>,
}

impl CameraHealth {
    pub fn new(camera_id: &str) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            status: HealthStatus::Connecting,
            last_error: None,
            last_frame_at: None,
            frames_received: 0,
            error_count: 0,
            reconnect_count: 0,
            fps_actual: 0.0,
            connected_since: None,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.connected_since
            .map(|t| (Utc::now() - t).num_seconds().max(0) as u64)
            .unwrap_or(0)
    }
}

/// A camera record paired with its current health, for configuration reads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraStatus {
    pub camera: Camera,
    pub health: Option<CameraHealth>,
}

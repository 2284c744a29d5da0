// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! Inference module - detector, model registry and the inference scheduler

mod classes;
mod detector;
mod model;
mod scheduler;
mod synthetic;
#[cfg(feature = "backend-tract")]
mod tract;

pub use classes::{event_type_for, COCO_CLASSES};
pub use detector::{infer, InferenceBackend, RawDetection};
pub use model::{load_model, ModelConfig, ModelHandle, ModelRegistry};
pub use scheduler::{DetectionHandler, InferenceScheduler, SchedulerStats};
pub use synthetic::SyntheticBackend;
#[cfg(feature = "backend-tract")]
pub use tract::TractYoloBackend;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Axis-aligned box in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Clip to `[0, width] x [0, height]`. `None` when nothing is left.
    pub fn clip(&self, width: u32, height: u32) -> Option<Self> {
        if !(self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()) {
            return None;
        }

        let x0 = self.x.clamp(0.0, width as f32);
        let y0 = self.y.clamp(0.0, height as f32);
        let x1 = (self.x + self.width).clamp(0.0, width as f32);
        let y1 = (self.y + self.height).clamp(0.0, height as f32);

        if x1 - x0 <= 0.0 || y1 - y0 <= 0.0 {
            return None;
        }
        Some(Self::new(x0, y0, x1 - x0, y1 - y0))
    }

    /// Intersection over union
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = (self.x + self.width).min(other.x + other.width);
        let y1 = (self.y + self.height).min(other.y + other.height);

        let inter = (x1 - x0).max(0.0) * (y1 - y0).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// One detected object in one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub camera_id: String,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

/// Inference scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Concurrent inference calls (GPU execution contexts)
    pub workers: usize,

    /// Admission queue depth. Defaults to twice the worker count.
    pub queue_depth: Option<usize>,

    /// Admission loop period
    pub tick_ms: u64,

    /// Upper bound on a single inference call
    pub timeout_ms: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            queue_depth: None,
            tick_ms: 20,
            timeout_ms: 2000,
        }
    }
}

impl InferenceConfig {
    pub fn effective_queue_depth(&self) -> usize {
        self.queue_depth.unwrap_or(self.workers.max(1) * 2).max(1)
    }
}

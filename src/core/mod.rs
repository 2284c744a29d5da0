// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! Core engine module - wires cameras, inference, events and live view together

mod backoff;
mod engine;
mod event_bus;

pub use backoff::{Backoff, BackoffConfig, RetryPolicy};
pub use engine::{Engine, EngineParts};
pub use event_bus::{BusMessage, BusPayload, EventBus, MessageKind};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::EmitterStats;
use crate::inference::SchedulerStats;

/// System-wide state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemState {
    pub running: bool,
    pub cameras_configured: usize,
    pub cameras_online: usize,
    pub frames_received: u64,
    pub live_viewers: usize,
    pub uptime_seconds: u64,
    pub model: String,
    pub inference: SchedulerStats,
    pub events: EmitterStats,
    pub last_event: Option<DateTime<Utc>>,
}

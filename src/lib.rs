// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! Vigil - Multi-Camera Stream Ingestion and Detection Pipeline
//!
//! The core of a self-hosted video surveillance system:
//! - One supervisor per camera with reconnect backoff and health reporting
//! - Fair round-robin inference scheduling over a bounded worker pool
//! - Threshold filtering and time-window correlation into events
//! - Event persistence with snapshots (SQLite or in memory)
//! - Live view fan-out over WebSocket with optional detection overlay
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Vigil Engine                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────┐   ┌────────────┐   ┌───────────┐   ┌─────────┐  │
//! │  │  Frame  │ → │   Stream   │ → │ Inference │ → │  Event  │  │
//! │  │ Sources │   │ Supervisor │   │ Scheduler │   │ Emitter │  │
//! │  └─────────┘   └────────────┘   └───────────┘   └─────────┘  │
//! │                      ↓                ↓              ↓       │
//! │               ┌────────────┐   ┌───────────┐   ┌─────────┐   │
//! │               │ Broadcast  │ ← │  Overlay  │   │ Storage │   │
//! │               │    Hub     │   │           │   │  Sink   │   │
//! │               └────────────┘   └───────────┘   └─────────┘   │
//! │                      ↓                               ↓       │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │                       Event Bus                        │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

#![allow(dead_code)]

pub mod camera;
pub mod config;
pub mod core;
pub mod error;
pub mod events;
pub mod inference;
pub mod storage;
pub mod stream;
pub mod streaming;

// Re-exports for convenience
pub use camera::{Camera, CameraHealth, HealthStatus};
pub use config::Config;
pub use self::core::{Engine, EventBus};
pub use events::{Event, EventType};
pub use inference::{Detection, InferenceScheduler};
pub use storage::{EventQuery, EventStore};
pub use stream::{Frame, StreamSupervisor};
pub use streaming::BroadcastHub;

/// Vigil version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Vigil name
pub const NAME: &str = "Vigil";

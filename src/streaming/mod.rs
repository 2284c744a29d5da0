// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! Streaming module - live broadcast hub and the WebSocket live view

mod hub;
mod websocket;

pub use hub::{BroadcastHub, LiveFrame, Subscription};
pub use websocket::{parse_route, LiveViewServer, Route};

use serde::{Deserialize, Serialize};

/// Live view configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Enable the WebSocket server
    pub websocket_enabled: bool,
    pub websocket_port: u16,
    pub websocket_max_clients: usize,

    /// Frames buffered per subscriber
    pub subscriber_buffer: usize,

    /// Consecutive full-buffer publishes before a subscriber is dropped
    pub max_missed: u32,

    /// JPEG quality for frames that have to be encoded for viewers
    pub jpeg_quality: u8,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            websocket_enabled: true,
            websocket_port: 8765,
            websocket_max_clients: 32,
            subscriber_buffer: 8,
            max_missed: 3,
            jpeg_quality: 75,
        }
    }
}

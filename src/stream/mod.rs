// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! Stream module - frame sources, per-camera supervisors and the supervisor registry

mod frame;
mod source;
mod ffmpeg;
mod synthetic;
mod supervisor;
mod registry;

pub use frame::{encode_jpeg, Frame};
pub use source::{DecodeGuard, DefaultSourceFactory, FrameSource, SourceFactory};
pub use ffmpeg::FfmpegSource;
pub use synthetic::{SyntheticParams, SyntheticSource};
pub use supervisor::{FrameSlot, StreamSupervisor, SupervisorState};
pub use registry::SupervisorRegistry;

use serde::{Deserialize, Serialize};

use crate::core::BackoffConfig;

/// Stream ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Reconnect backoff
    pub backoff: BackoffConfig,

    /// A stream with no frame for this long is considered broken
    pub max_silence_ms: u64,

    /// Upper bound on a single open attempt
    pub connect_timeout_ms: u64,

    /// Grace period for a supervisor to stop before its task is aborted
    pub stop_grace_ms: u64,

    /// Consecutive undecodable pictures tolerated before the stream is failed
    pub max_decode_failures: u32,

    /// ffmpeg binary used for network sources
    pub ffmpeg_path: String,

    /// Output rate requested from ffmpeg
    pub max_fps: Option<u32>,

    /// ffmpeg MJPEG quality scale (2 best .. 31 worst)
    pub mjpeg_qscale: u8,

    /// JPEG quality used when a frame has to be encoded locally
    pub jpeg_quality: u8,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            max_silence_ms: 15_000,
            connect_timeout_ms: 10_000,
            stop_grace_ms: 5_000,
            max_decode_failures: 10,
            ffmpeg_path: "ffmpeg".to_string(),
            max_fps: Some(30),
            mjpeg_qscale: 5,
            jpeg_quality: 80,
        }
    }
}

// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! Error taxonomy for the ingestion and detection pipeline
//!
//! Every failure that can happen on a per-camera path has a typed error here.
//! None of them is fatal: supervisors reconnect, the scheduler drops the frame,
//! the emitter retries and then logs the drop.

use std::time::Duration;
use thiserror::Error;

/// Frame source failures
#[derive(Debug, Error)]
pub enum SourceError {
    /// Stream could not be opened; triggers a backoff reconnect
    #[error("cannot open {uri}: {reason}")]
    Connection { uri: String, reason: String },

    /// An established stream broke; triggers a reconnect
    #[error("stream failure: {0}")]
    Stream(String),

    /// The remote side closed the stream cleanly
    #[error("end of stream")]
    EndOfStream,
}

impl SourceError {
    pub fn connection(uri: &str, reason: impl ToString) -> Self {
        SourceError::Connection {
            uri: uri.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Short label used in structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::Connection { .. } => "connection",
            SourceError::Stream(_) => "stream",
            SourceError::EndOfStream => "end_of_stream",
        }
    }
}

/// Detector failures. A failed call drops the frame and nothing else.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("backend failure: {0}")]
    Backend(String),

    #[error("inference timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid model output: {0}")]
    InvalidOutput(String),
}

impl InferenceError {
    pub fn kind(&self) -> &'static str {
        match self {
            InferenceError::Backend(_) => "inference",
            InferenceError::Timeout(_) => "timeout",
            InferenceError::InvalidOutput(_) => "invalid_output",
        }
    }
}

/// Storage sink rejected a write
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("write rejected: {0}")]
    Rejected(String),
}

impl WriteError {
    pub fn kind(&self) -> &'static str {
        match self {
            WriteError::Database(_) => "database",
            WriteError::Io(_) => "io",
            WriteError::Serialization(_) => "serialization",
            WriteError::Rejected(_) => "rejected",
        }
    }
}

/// No frame has been sampled for the camera yet (or it is not registered)
#[derive(Debug, Error)]
#[error("no frame available for camera {camera_id}")]
pub struct NotAvailable {
    pub camera_id: String,
}

impl NotAvailable {
    pub fn new(camera_id: &str) -> Self {
        Self {
            camera_id: camera_id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(SourceError::connection("rtsp://x", "refused").kind(), "connection");
        assert_eq!(SourceError::EndOfStream.kind(), "end_of_stream");
        assert_eq!(InferenceError::Timeout(Duration::from_secs(2)).kind(), "timeout");
        assert_eq!(WriteError::Rejected("full".into()).kind(), "rejected");
    }

    #[test]
    fn test_error_messages() {
        let err = SourceError::connection("rtsp://cam-1/stream", "timed out");
        assert_eq!(err.to_string(), "cannot open rtsp://cam-1/stream: timed out");

        let err = NotAvailable::new("cam-1");
        assert_eq!(err.to_string(), "no frame available for camera cam-1");
    }
}

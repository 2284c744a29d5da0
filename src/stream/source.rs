// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! Frame source traits

use async_trait::async_trait;
use tracing::debug;

use super::ffmpeg::FfmpegSource;
use super::synthetic::SyntheticSource;
use super::{Frame, StreamConfig};
use crate::error::SourceError;

/// An open connection to one video stream.
///
/// Sources never retry on their own: a failed read is reported to the
/// supervisor, which owns the reconnect policy.
#[async_trait]
pub trait FrameSource: Send {
    /// URI this source was opened with
    fn uri(&self) -> &str;

    /// Next decoded frame. Blocks (asynchronously) on network I/O only.
    async fn next_frame(&mut self) -> Result<Frame, SourceError>;

    /// Release the connection
    async fn close(&mut self);
}

/// Opens frame sources. One `open` call is one connection attempt.
#[async_trait]
pub trait SourceFactory: Send + Sync {
    async fn open(&self, camera_id: &str, uri: &str) -> Result<Box<dyn FrameSource>, SourceError>;
}

/// Picks the synthetic generator for `stub://` URIs and ffmpeg for everything else
pub struct DefaultSourceFactory {
    config: StreamConfig,
}

impl DefaultSourceFactory {
    pub fn new(config: StreamConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SourceFactory for DefaultSourceFactory {
    async fn open(&self, camera_id: &str, uri: &str) -> Result<Box<dyn FrameSource>, SourceError> {
        if uri.starts_with("stub://") {
            let source = SyntheticSource::open(camera_id, uri, self.config.max_decode_failures)?;
            Ok(Box::new(source))
        } else {
            debug!(camera = %camera_id, "Opening ffmpeg source for {}", uri);
            let source = FfmpegSource::open(camera_id, uri, &self.config).await?;
            Ok(Box::new(source))
        }
    }
}

/// Tracks consecutive decode failures.
///
/// Single bad frames are skipped; a run longer than the limit is a broken stream.
#[derive(Debug, Clone)]
pub struct DecodeGuard {
    consecutive: u32,
    limit: u32,
    total: u64,
}

impl DecodeGuard {
    pub fn new(limit: u32) -> Self {
        Self {
            consecutive: 0,
            limit,
            total: 0,
        }
    }

    pub fn success(&mut self) {
        self.consecutive = 0;
    }

    /// Record a failed decode; errors once the run exceeds the limit
    pub fn failure(&mut self, reason: &str) -> Result<(), SourceError> {
        self.consecutive += 1;
        self.total += 1;
        if self.consecutive > self.limit {
            Err(SourceError::Stream(format!(
                "{} consecutive decode failures (last: {})",
                self.consecutive, reason
            )))
        } else {
            debug!("Skipping undecodable frame: {}", reason);
            Ok(())
        }
    }

    pub fn total_failures(&self) -> u64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_guard_skips_then_fails() {
        let mut guard = DecodeGuard::new(10);
        for _ in 0..10 {
            assert!(guard.failure("bad huffman table").is_ok());
        }
        let err = guard.failure("bad huffman table").unwrap_err();
        assert_eq!(err.kind(), "stream");
        assert_eq!(guard.total_failures(), 11);
    }

    #[test]
    fn test_decode_guard_resets_on_success() {
        let mut guard = DecodeGuard::new(2);
        guard.failure("x").unwrap();
        guard.failure("x").unwrap();
        guard.success();
        guard.failure("x").unwrap();
        guard.failure("x").unwrap();
        assert!(guard.failure("x").is_err());
    }

    #[tokio::test]
    async fn test_default_factory_opens_stub() {
        let factory = DefaultSourceFactory::new(StreamConfig::default());
        let mut source = factory.open("c1", "stub://c1?fps=50&width=32&height=24").await.unwrap();
        let frame = source.next_frame().await.unwrap();
        assert_eq!(frame.width(), 32);
        assert_eq!(frame.camera_id, "c1");
        source.close().await;
    }
}

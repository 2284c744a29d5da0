// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! Synthetic frame source for demo mode and testing.
//!
//! `stub://name?fps=10&width=320&height=240` produces a moving block over a
//! noisy background. Optional knobs simulate misbehaving cameras:
//! `fail_open=1`, `fail_after=N` (stream breaks after N frames) and
//! `corrupt_every=K` (every K-th picture fails to decode).

use std::time::Duration;
use async_trait::async_trait;
use image::{Rgb, RgbImage};
use rand::prelude::*;
use rand::rngs::StdRng;
use tracing::info;

use super::source::{DecodeGuard, FrameSource};
use super::Frame;
use crate::error::SourceError;

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticParams {
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub fail_open: bool,
    pub fail_after: Option<u64>,
    pub corrupt_every: Option<u64>,
}

impl Default for SyntheticParams {
    fn default() -> Self {
        Self {
            fps: 10.0,
            width: 320,
            height: 240,
            fail_open: false,
            fail_after: None,
            corrupt_every: None,
        }
    }
}

impl SyntheticParams {
    /// Parse the query part of a `stub://` URI. Unknown keys are ignored.
    pub fn parse(uri: &str) -> Self {
        let mut params = Self::default();
        let query = match uri.split_once('?') {
            Some((_, q)) => q,
            None => return params,
        };

        for pair in query.split('&') {
            let (key, value) = match pair.split_once('=') {
                Some(kv) => kv,
                None => continue,
            };
            match key {
                "fps" => params.fps = value.parse().unwrap_or(params.fps).max(0.1),
                "width" => params.width = value.parse().unwrap_or(params.width).max(8),
                "height" => params.height = value.parse().unwrap_or(params.height).max(8),
                "fail_open" => params.fail_open = value == "1" || value == "true",
                "fail_after" => params.fail_after = value.parse().ok(),
                "corrupt_every" => params.corrupt_every = value.parse().ok().filter(|k| *k > 0),
                _ => {}
            }
        }

        params
    }
}

/// Generates frames at a fixed rate
pub struct SyntheticSource {
    camera_id: String,
    uri: String,
    params: SyntheticParams,
    produced: u64,
    decode: DecodeGuard,
    rng: StdRng,
}

impl SyntheticSource {
    pub fn open(camera_id: &str, uri: &str, max_decode_failures: u32) -> Result<Self, SourceError> {
        let params = SyntheticParams::parse(uri);
        if params.fail_open {
            return Err(SourceError::connection(uri, "connection refused (simulated)"));
        }

        info!(camera = %camera_id, "Synthetic source opened: {}", uri);

        Ok(Self {
            camera_id: camera_id.to_string(),
            uri: uri.to_string(),
            params,
            produced: 0,
            decode: DecodeGuard::new(max_decode_failures),
            rng: StdRng::from_entropy(),
        })
    }

    fn render(&mut self) -> RgbImage {
        let (w, h) = (self.params.width, self.params.height);
        let mut image = RgbImage::new(w, h);

        let base = 40 + (self.produced % 20) as u8;
        for pixel in image.pixels_mut() {
            let noise: u8 = self.rng.gen_range(0..8);
            *pixel = Rgb([base + noise, base + noise, base + noise + 10]);
        }

        // moving block, one pass across the frame every ~5 seconds
        let block_w = (w / 6).max(2);
        let block_h = (h / 3).max(2);
        let period = (self.params.fps * 5.0).max(1.0) as u64;
        let x0 = ((self.produced % period) * (w - block_w) as u64 / period) as u32;
        let y0 = (h - block_h) / 2;
        for y in y0..y0 + block_h {
            for x in x0..x0 + block_w {
                image.put_pixel(x, y, Rgb([220, 80, 60]));
            }
        }

        image
    }
}

#[async_trait]
impl FrameSource for SyntheticSource {
    fn uri(&self) -> &str {
        &self.uri
    }

    async fn next_frame(&mut self) -> Result<Frame, SourceError> {
        loop {
            if let Some(limit) = self.params.fail_after {
                if self.produced >= limit {
                    return Err(SourceError::Stream("connection reset by peer (simulated)".into()));
                }
            }

            tokio::time::sleep(Duration::from_secs_f64(1.0 / self.params.fps)).await;
            self.produced += 1;

            if let Some(k) = self.params.corrupt_every {
                if self.produced % k == 0 {
                    self.decode.failure("corrupt picture (simulated)")?;
                    continue;
                }
            }

            self.decode.success();
            let image = self.render();
            return Ok(Frame::new(&self.camera_id, image).with_sequence(self.produced));
        }
    }

    async fn close(&mut self) {
        info!(camera = %self.camera_id, "Synthetic source closed after {} frames", self.produced);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_params() {
        let p = SyntheticParams::parse("stub://door?fps=25&width=64&height=48&fail_after=3");
        assert_eq!(p.fps, 25.0);
        assert_eq!(p.width, 64);
        assert_eq!(p.height, 48);
        assert_eq!(p.fail_after, Some(3));
        assert!(!p.fail_open);

        assert_eq!(SyntheticParams::parse("stub://plain"), SyntheticParams::default());
    }

    #[test]
    fn test_fail_open() {
        let err = SyntheticSource::open("c", "stub://c?fail_open=1", 10).err().unwrap();
        assert_eq!(err.kind(), "connection");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_after_breaks_stream() {
        let mut source = SyntheticSource::open("c", "stub://c?fps=10&width=16&height=16&fail_after=2", 10).unwrap();
        assert!(source.next_frame().await.is_ok());
        assert!(source.next_frame().await.is_ok());
        assert_eq!(source.next_frame().await.unwrap_err().kind(), "stream");
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupt_frames_are_skipped() {
        let mut source = SyntheticSource::open("c", "stub://c?fps=10&width=16&height=16&corrupt_every=2", 10).unwrap();
        let a = source.next_frame().await.unwrap();
        let b = source.next_frame().await.unwrap();
        assert_eq!(a.sequence, 1);
        assert_eq!(b.sequence, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_corrupt_surfaces_stream_error() {
        let mut source = SyntheticSource::open("c", "stub://c?fps=10&width=16&height=16&corrupt_every=1", 10).unwrap();
        assert_eq!(source.next_frame().await.unwrap_err().kind(), "stream");
    }
}

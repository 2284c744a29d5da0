// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! Decoded video frame

use std::sync::Arc;
use anyhow::Result;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

/// One decoded image from a camera stream.
///
/// Pixel data and encoded bytes are reference counted, so cloning a frame
/// to hand it to the scheduler, the hub and a snapshot request is cheap.
#[derive(Debug, Clone)]
pub struct Frame {
    pub camera_id: String,
    /// Strictly increasing per camera, assigned by the owning supervisor
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    pub image: Arc<RgbImage>,
    /// Compressed still as delivered by the source, if any
    pub encoded: Option<Arc<Vec<u8>>>,
}

impl Frame {
    pub fn new(camera_id: &str, image: RgbImage) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            sequence: 0,
            captured_at: Utc::now(),
            image: Arc::new(image),
            encoded: None,
        }
    }

    pub fn with_encoded(mut self, jpeg: Vec<u8>) -> Self {
        self.encoded = Some(Arc::new(jpeg));
        self
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_timestamp(mut self, captured_at: DateTime<Utc>) -> Self {
        self.captured_at = captured_at;
        self
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// JPEG bytes for this frame, reusing the source encoding when present
    pub fn jpeg(&self, quality: u8) -> Result<Arc<Vec<u8>>> {
        match &self.encoded {
            Some(bytes) => Ok(bytes.clone()),
            None => Ok(Arc::new(encode_jpeg(&self.image, quality)?)),
        }
    }
}

/// Encode an RGB image as JPEG
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity((image.width() * image.height() / 4) as usize);
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    encoder.encode_image(image)?;
    Ok(buf)
}

// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! Colour-blob backend for demo mode.
//!
//! Reports strongly red regions as `person`, which is what the synthetic
//! frame source draws. Needs no model file and runs on any machine.

use image::RgbImage;

use super::detector::{InferenceBackend, RawDetection};
use super::BoundingBox;
use crate::error::InferenceError;
use crate::stream::Frame;

pub struct SyntheticBackend {
    class_id: usize,
    min_pixels: u32,
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self {
            class_id: 0,
            min_pixels: 16,
        }
    }

    fn is_marker(pixel: &image::Rgb<u8>) -> bool {
        let [r, g, b] = pixel.0;
        r > 180 && g < 130 && b < 130
    }

    fn find_blob(&self, image: &RgbImage) -> Option<(BoundingBox, f32)> {
        let (mut x0, mut y0, mut x1, mut y1) = (u32::MAX, u32::MAX, 0u32, 0u32);
        let mut count = 0u32;

        for (x, y, pixel) in image.enumerate_pixels() {
            if Self::is_marker(pixel) {
                x0 = x0.min(x);
                y0 = y0.min(y);
                x1 = x1.max(x);
                y1 = y1.max(y);
                count += 1;
            }
        }

        if count < self.min_pixels {
            return None;
        }

        let w = (x1 - x0 + 1) as f32;
        let h = (y1 - y0 + 1) as f32;
        let fill = count as f32 / (w * h);
        Some((BoundingBox::new(x0 as f32, y0 as f32, w, h), 0.5 + 0.45 * fill))
    }
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for SyntheticBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn run(&self, frame: &Frame) -> Result<Vec<RawDetection>, InferenceError> {
        Ok(self
            .find_blob(&frame.image)
            .map(|(bbox, confidence)| RawDetection::new(self.class_id, confidence, bbox))
            .into_iter()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_finds_block() {
        let mut image = RgbImage::from_pixel(40, 30, Rgb([50, 50, 60]));
        for y in 10..20 {
            for x in 5..15 {
                image.put_pixel(x, y, Rgb([220, 80, 60]));
            }
        }

        let out = SyntheticBackend::new().run(&Frame::new("c", image)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bbox, BoundingBox::new(5.0, 10.0, 10.0, 10.0));
        assert!((out[0].confidence - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_empty_scene() {
        let image = RgbImage::from_pixel(40, 30, Rgb([50, 50, 60]));
        assert!(SyntheticBackend::new().run(&Frame::new("c", image)).unwrap().is_empty());
    }
}

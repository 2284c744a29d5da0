// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! Annotated snapshot capture

use anyhow::Result;
use async_trait::async_trait;
use image::{Rgb, RgbImage};

use crate::inference::{event_type_for, Detection};
use crate::stream::{encode_jpeg, Frame};

const BOX_THICKNESS: u32 = 2;

/// Produces the still image attached to an event
#[async_trait]
pub trait SnapshotCapture: Send + Sync {
    async fn capture(&self, frame: &Frame, detections: &[Detection]) -> Result<Vec<u8>>;
}

/// JPEG of the frame with detection boxes drawn on it
pub struct JpegSnapshotter {
    quality: u8,
}

impl JpegSnapshotter {
    pub fn new(quality: u8) -> Self {
        Self { quality }
    }
}

#[async_trait]
impl SnapshotCapture for JpegSnapshotter {
    async fn capture(&self, frame: &Frame, detections: &[Detection]) -> Result<Vec<u8>> {
        let image = frame.image.clone();
        let detections = detections.to_vec();
        let quality = self.quality;

        tokio::task::spawn_blocking(move || {
            let mut annotated = (*image).clone();
            draw_detections(&mut annotated, &detections);
            encode_jpeg(&annotated, quality)
        })
        .await?
    }
}

/// Draw box outlines, coloured by event type
pub fn draw_detections(image: &mut RgbImage, detections: &[Detection]) {
    for d in detections {
        let color = Rgb(event_type_for(&d.class_name).color());
        let clipped = match d.bbox.clip(image.width(), image.height()) {
            Some(b) => b,
            None => continue,
        };

        let x0 = clipped.x as u32;
        let y0 = clipped.y as u32;
        let x1 = ((clipped.x + clipped.width) as u32).min(image.width()).saturating_sub(1);
        let y1 = ((clipped.y + clipped.height) as u32).min(image.height()).saturating_sub(1);

        for t in 0..BOX_THICKNESS {
            for x in x0..=x1 {
                put(image, x, y0 + t, color);
                put(image, x, y1.saturating_sub(t), color);
            }
            for y in y0..=y1 {
                put(image, x0 + t, y, color);
                put(image, x1.saturating_sub(t), y, color);
            }
        }
    }
}

fn put(image: &mut RgbImage, x: u32, y: u32, color: Rgb<u8>) {
    if x < image.width() && y < image.height() {
        image.put_pixel(x, y, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::inference::BoundingBox;

    fn detection(class: &str, bbox: BoundingBox) -> Detection {
        Detection {
            class_name: class.into(),
            confidence: 0.9,
            bbox,
            camera_id: "cam".into(),
            sequence: 1,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_draws_outline_only() {
        let mut image = RgbImage::new(20, 20);
        draw_detections(&mut image, &[detection("person", BoundingBox::new(2.0, 2.0, 10.0, 10.0))]);

        assert_eq!(image.get_pixel(2, 2).0, [255, 64, 64]);
        assert_eq!(image.get_pixel(11, 11).0, [255, 64, 64]);
        assert_eq!(image.get_pixel(6, 6).0, [0, 0, 0]);
        assert_eq!(image.get_pixel(15, 15).0, [0, 0, 0]);
    }

    #[test]
    fn test_edge_boxes_do_not_panic() {
        let mut image = RgbImage::new(10, 10);
        draw_detections(
            &mut image,
            &[
                detection("car", BoundingBox::new(-5.0, -5.0, 30.0, 30.0)),
                detection("dog", BoundingBox::new(9.0, 9.0, 1.0, 1.0)),
                detection("cup", BoundingBox::new(50.0, 50.0, 1.0, 1.0)),
            ],
        );
        assert_eq!(image.get_pixel(0, 0).0, [64, 160, 255]);
    }

    #[tokio::test]
    async fn test_capture_is_jpeg() {
        let frame = Frame::new("cam", RgbImage::new(32, 24));
        let bytes = JpegSnapshotter::new(85)
            .capture(&frame, &[detection("person", BoundingBox::new(1.0, 1.0, 8.0, 8.0))])
            .await
            .unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);

        // the source frame is untouched
        assert_eq!(frame.image.get_pixel(1, 1).0, [0, 0, 0]);
    }
}

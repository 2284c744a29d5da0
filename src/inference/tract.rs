// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! YOLOv8 ONNX backend on tract.
//!
//! Input is the frame letterboxed to a square `input_size` with grey padding.
//! Output is `[1, 4 + classes, anchors]`: box centre and size in input pixels
//! followed by per-class scores. Boxes are mapped back to frame pixels, filtered
//! by the backend confidence floor and de-duplicated per class with NMS.

use std::path::Path;
use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use tract_onnx::prelude::*;
use tracing::info;

use super::detector::{InferenceBackend, RawDetection};
use super::model::ModelConfig;
use super::BoundingBox;
use crate::error::InferenceError;
use crate::stream::Frame;

const PAD_VALUE: u8 = 114;

pub struct TractYoloBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    confidence: f32,
    iou: f32,
}

/// Scale and offsets used to place the frame inside the model input
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn new(width: u32, height: u32, size: u32) -> Self {
        let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
        let pad_x = (size as f32 - width as f32 * scale) / 2.0;
        let pad_y = (size as f32 - height as f32 * scale) / 2.0;
        Self { scale, pad_x, pad_y }
    }

    /// Model-space centre box to frame-space corner box
    fn unmap(&self, cx: f32, cy: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox::new(
            (cx - w / 2.0 - self.pad_x) / self.scale,
            (cy - h / 2.0 - self.pad_y) / self.scale,
            w / self.scale,
            h / self.scale,
        )
    }
}

impl TractYoloBackend {
    pub fn load(path: &Path, config: &ModelConfig) -> Result<Self> {
        let size = config.input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(path)
            .with_context(|| format!("failed to load ONNX model from {}", path.display()))?
            .with_input_fact(0, f32::fact([1, 3, size, size]).into())
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        info!("Loaded YOLO model {} ({}x{})", path.display(), size, size);

        Ok(Self {
            model,
            input_size: config.input_size,
            confidence: config.confidence,
            iou: config.iou,
        })
    }

    fn build_input(&self, image: &RgbImage) -> (Tensor, Letterbox) {
        let size = self.input_size;
        let lb = Letterbox::new(image.width(), image.height(), size);

        let w = ((image.width() as f32 * lb.scale).round() as u32).clamp(1, size);
        let h = ((image.height() as f32 * lb.scale).round() as u32).clamp(1, size);
        let resized = imageops::resize(image, w, h, FilterType::Triangle);

        let mut canvas = RgbImage::from_pixel(size, size, Rgb([PAD_VALUE; 3]));
        imageops::overlay(&mut canvas, &resized, lb.pad_x as i64, lb.pad_y as i64);

        let size = size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            canvas.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });

        (input.into_tensor(), lb)
    }

    fn decode(&self, output: &Tensor, lb: &Letterbox) -> Result<Vec<RawDetection>, InferenceError> {
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| InferenceError::InvalidOutput(e.to_string()))?;

        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 || shape[1] <= 4 {
            return Err(InferenceError::InvalidOutput(format!("unexpected output shape {:?}", shape)));
        }

        let (channels, anchors) = (shape[1], shape[2]);
        let mut candidates = Vec::new();
        for i in 0..anchors {
            let (mut best_class, mut best_score) = (0usize, f32::MIN);
            for c in 4..channels {
                let score = view[[0, c, i]];
                if score > best_score {
                    best_score = score;
                    best_class = c - 4;
                }
            }

            if best_score < self.confidence {
                continue;
            }

            let bbox = lb.unmap(view[[0, 0, i]], view[[0, 1, i]], view[[0, 2, i]], view[[0, 3, i]]);
            candidates.push(RawDetection::new(best_class, best_score, bbox));
        }

        Ok(non_max_suppression(candidates, self.iou))
    }
}

impl InferenceBackend for TractYoloBackend {
    fn name(&self) -> &str {
        "tract"
    }

    fn run(&self, frame: &Frame) -> Result<Vec<RawDetection>, InferenceError> {
        let (input, lb) = self.build_input(&frame.image);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| InferenceError::Backend(e.to_string()))?;

        let output = outputs
            .first()
            .ok_or_else(|| InferenceError::InvalidOutput("model produced no outputs".into()))?;
        self.decode(output, &lb)
    }
}

/// Greedy per-class NMS, highest confidence first
fn non_max_suppression(mut candidates: Vec<RawDetection>, iou: f32) -> Vec<RawDetection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<RawDetection> = Vec::new();
    for c in candidates {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == c.class_id && k.bbox.iou(&c.bbox) > iou);
        if !suppressed {
            kept.push(c);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letterbox_unmap() {
        // 1280x720 into 640: scale 0.5, 140px bars top and bottom
        let lb = Letterbox::new(1280, 720, 640);
        assert_eq!(lb.scale, 0.5);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 140.0);

        let b = lb.unmap(320.0, 320.0, 100.0, 50.0);
        assert_eq!(b, BoundingBox::new(540.0, 310.0, 200.0, 100.0));
    }

    #[test]
    fn test_nms_per_class() {
        let boxes = vec![
            RawDetection::new(0, 0.6, BoundingBox::new(1.0, 1.0, 10.0, 10.0)),
            RawDetection::new(0, 0.9, BoundingBox::new(0.0, 0.0, 10.0, 10.0)),
            RawDetection::new(2, 0.7, BoundingBox::new(0.0, 0.0, 10.0, 10.0)),
            RawDetection::new(0, 0.5, BoundingBox::new(50.0, 50.0, 10.0, 10.0)),
        ];
        let kept = non_max_suppression(boxes, 0.45);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].class_id, 2);
        assert_eq!(kept[2].confidence, 0.5);
    }
}

// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! Detector - backend output to validated detections

use tracing::debug;

use super::model::ModelHandle;
use super::{BoundingBox, Detection};
use crate::error::InferenceError;
use crate::stream::Frame;

/// Unvalidated backend output, in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub class_id: usize,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl RawDetection {
    pub fn new(class_id: usize, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_id,
            confidence,
            bbox,
        }
    }
}

/// A model runtime.
///
/// `run` is synchronous and may take tens of milliseconds; callers move it off
/// the async executor.
pub trait InferenceBackend: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self, frame: &Frame) -> Result<Vec<RawDetection>, InferenceError>;
}

/// Run the model in `handle` on one frame.
///
/// Confidences are clamped to [0, 1], boxes are clipped to the frame and
/// dropped when empty. NaN confidences and class ids outside the handle's
/// vocabulary are discarded.
pub fn infer(frame: &Frame, handle: &ModelHandle) -> Result<Vec<Detection>, InferenceError> {
    let raw = handle.backend().run(frame)?;
    let (width, height) = (frame.width(), frame.height());

    let mut detections = Vec::with_capacity(raw.len());
    for r in raw {
        if r.confidence.is_nan() {
            debug!(camera = %frame.camera_id, model = %handle.id(), "Discarding NaN confidence");
            continue;
        }

        let class_name = match handle.class_name(r.class_id) {
            Some(name) => name,
            None => {
                debug!(camera = %frame.camera_id, model = %handle.id(), "Discarding unknown class id {}", r.class_id);
                continue;
            }
        };

        let bbox = match r.bbox.clip(width, height) {
            Some(b) => b,
            None => continue,
        };

        detections.push(Detection {
            class_name: class_name.to_string(),
            confidence: r.confidence.clamp(0.0, 1.0),
            bbox,
            camera_id: frame.camera_id.clone(),
            sequence: frame.sequence,
            timestamp: frame.captured_at,
        });
    }

    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use image::RgbImage;

    struct Fixed(Vec<RawDetection>);

    impl InferenceBackend for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn run(&self, _frame: &Frame) -> Result<Vec<RawDetection>, InferenceError> {
            Ok(self.0.clone())
        }
    }

    struct Broken;

    impl InferenceBackend for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn run(&self, _frame: &Frame) -> Result<Vec<RawDetection>, InferenceError> {
            Err(InferenceError::Backend("device lost".into()))
        }
    }

    fn handle(backend: impl InferenceBackend + 'static) -> ModelHandle {
        ModelHandle::new("test", 1, vec!["person".into(), "car".into()], Arc::new(backend))
    }

    fn frame() -> Frame {
        Frame::new("cam", RgbImage::new(100, 50)).with_sequence(7)
    }

    #[test]
    fn test_numeric_contract() {
        let h = handle(Fixed(vec![
            RawDetection::new(0, 1.7, BoundingBox::new(90.0, 40.0, 30.0, 30.0)),
            RawDetection::new(1, -0.2, BoundingBox::new(0.0, 0.0, 10.0, 10.0)),
            RawDetection::new(0, f32::NAN, BoundingBox::new(0.0, 0.0, 10.0, 10.0)),
            RawDetection::new(5, 0.9, BoundingBox::new(0.0, 0.0, 10.0, 10.0)),
            RawDetection::new(0, 0.9, BoundingBox::new(200.0, 0.0, 10.0, 10.0)),
        ]));

        let out = infer(&frame(), &h).unwrap();
        assert_eq!(out.len(), 2);

        assert_eq!(out[0].class_name, "person");
        assert_eq!(out[0].confidence, 1.0);
        assert_eq!(out[0].bbox, BoundingBox::new(90.0, 40.0, 10.0, 10.0));
        assert_eq!(out[0].sequence, 7);
        assert_eq!(out[0].camera_id, "cam");

        assert_eq!(out[1].class_name, "car");
        assert_eq!(out[1].confidence, 0.0);
    }

    #[test]
    fn test_backend_error_passes_through() {
        let err = infer(&frame(), &handle(Broken)).unwrap_err();
        assert_eq!(err.kind(), "inference");
    }
}

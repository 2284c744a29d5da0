// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! Model handles and the hot-swappable model registry

use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

use super::classes::COCO_CLASSES;
use super::detector::InferenceBackend;
use super::synthetic::SyntheticBackend;

/// Model selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// `synthetic` or `tract`
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
    /// Backend-side confidence floor, below any camera threshold
    pub confidence: f32,
    pub iou: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backend: "synthetic".to_string(),
            model_path: None,
            input_size: 640,
            confidence: 0.25,
            iou: 0.45,
        }
    }
}

/// An immutable, loaded model. Swapping models publishes a new handle.
pub struct ModelHandle {
    id: String,
    version: u32,
    classes: Vec<String>,
    backend: Arc<dyn InferenceBackend>,
}

impl ModelHandle {
    pub fn new(id: &str, version: u32, classes: Vec<String>, backend: Arc<dyn InferenceBackend>) -> Self {
        Self {
            id: id.to_string(),
            version,
            classes,
            backend,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn class_name(&self, class_id: usize) -> Option<&str> {
        self.classes.get(class_id).map(|s| s.as_str())
    }

    pub fn backend(&self) -> &dyn InferenceBackend {
        self.backend.as_ref()
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("classes", &self.classes.len())
            .field("backend", &self.backend.name())
            .finish()
    }
}

/// Single-writer, many-reader holder of the active model
pub struct ModelRegistry {
    tx: watch::Sender<Arc<ModelHandle>>,
}

impl ModelRegistry {
    pub fn new(handle: ModelHandle) -> Self {
        let (tx, _) = watch::channel(Arc::new(handle));
        Self { tx }
    }

    /// Registry holding the synthetic demo model
    pub fn synthetic() -> Self {
        let classes = COCO_CLASSES.iter().map(|s| s.to_string()).collect();
        Self::new(ModelHandle::new("synthetic", 1, classes, Arc::new(SyntheticBackend::new())))
    }

    /// Handle for the next inference call
    pub fn active(&self) -> Arc<ModelHandle> {
        self.tx.borrow().clone()
    }

    /// Publish a new model. Calls already holding the old handle finish with it.
    pub fn swap(&self, handle: ModelHandle) -> Arc<ModelHandle> {
        info!("Activating model {} v{} ({})", handle.id, handle.version, handle.backend.name());
        self.tx.send_replace(Arc::new(handle))
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ModelHandle>> {
        self.tx.subscribe()
    }
}

/// Build the configured model
pub fn load_model(config: &ModelConfig) -> Result<ModelHandle> {
    match config.backend.as_str() {
        "synthetic" => {
            let classes = COCO_CLASSES.iter().map(|s| s.to_string()).collect();
            Ok(ModelHandle::new("synthetic", 1, classes, Arc::new(SyntheticBackend::new())))
        }
        #[cfg(feature = "backend-tract")]
        "tract" => {
            let path = match &config.model_path {
                Some(p) => p,
                None => bail!("model.model_path is required for the tract backend"),
            };
            let backend = super::tract::TractYoloBackend::load(path, config)?;
            let id = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "yolov8".to_string());
            let classes = COCO_CLASSES.iter().map(|s| s.to_string()).collect();
            Ok(ModelHandle::new(&id, 1, classes, Arc::new(backend)))
        }
        other => bail!("Unknown model backend: {} (available: synthetic{})", other, tract_hint()),
    }
}

fn tract_hint() -> &'static str {
    if cfg!(feature = "backend-tract") {
        ", tract"
    } else {
        ""
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InferenceError;
    use crate::inference::RawDetection;
    use crate::stream::Frame;

    struct Null;

    impl InferenceBackend for Null {
        fn name(&self) -> &str {
            "null"
        }

        fn run(&self, _frame: &Frame) -> Result<Vec<RawDetection>, InferenceError> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_swap_publishes_new_handle() {
        let registry = ModelRegistry::synthetic();
        let held = registry.active();
        let mut rx = registry.subscribe();

        let old = registry.swap(ModelHandle::new("custom", 2, vec!["widget".into()], Arc::new(Null)));
        assert_eq!(old.id(), "synthetic");
        assert!(rx.has_changed().unwrap());

        // a caller holding the old handle keeps a consistent view
        assert_eq!(held.id(), "synthetic");
        assert_eq!(held.class_name(0), Some("person"));

        let now = registry.active();
        assert_eq!(now.version(), 2);
        assert_eq!(now.class_name(0), Some("widget"));
        assert_eq!(now.backend().name(), "null");
    }

    #[test]
    fn test_concurrent_readers_never_see_mixed_handle() {
        let registry = Arc::new(ModelRegistry::synthetic());

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..2000 {
                        let h = registry.active();
                        let expected = if h.id() == "synthetic" { "person" } else { "widget" };
                        assert_eq!(h.class_name(0), Some(expected));
                    }
                })
            })
            .collect();

        for v in 2..200 {
            registry.swap(ModelHandle::new("custom", v, vec!["widget".into()], Arc::new(Null)));
        }

        for r in readers {
            r.join().unwrap();
        }
    }

    #[test]
    fn test_load_model() {
        let handle = load_model(&ModelConfig::default()).unwrap();
        assert_eq!(handle.id(), "synthetic");
        assert_eq!(handle.classes().len(), 80);

        let bad = ModelConfig {
            backend: "openvino".into(),
            ..Default::default()
        };
        assert!(load_model(&bad).is_err());
    }
}

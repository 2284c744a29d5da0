// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! Camera catalog - the configuration collaborator that drives supervisor lifecycle

use std::collections::HashMap;
use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use super::Camera;

/// Change notification emitted by a catalog
#[derive(Debug, Clone)]
pub enum CameraChange {
    /// Camera created or updated
    Upserted(Camera),
    /// Camera deleted
    Removed(String),
}

/// Source of camera records and their change notifications
#[async_trait]
pub trait CameraCatalog: Send + Sync {
    /// Current camera records
    async fn list_cameras(&self) -> Vec<Camera>;

    /// Stream of create/update/delete notifications
    fn subscribe(&self) -> broadcast::Receiver<CameraChange>;
}

/// Catalog held in memory, seeded from the configuration file
pub struct InMemoryCatalog {
    cameras: RwLock<HashMap<String, Camera>>,
    changes: broadcast::Sender<CameraChange>,
}

impl InMemoryCatalog {
    pub fn new(cameras: Vec<Camera>) -> Self {
        let (changes, _) = broadcast::channel(256);
        let cameras = cameras
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();

        Self {
            cameras: RwLock::new(cameras),
            changes,
        }
    }

    /// Create or update a camera and notify subscribers
    pub async fn upsert(&self, camera: Camera) {
        let id = camera.id.clone();
        let previous = self.cameras.write().await.insert(id.clone(), camera.clone());

        match previous {
            Some(_) => debug!(camera = %id, "Camera updated"),
            None => info!(camera = %id, "Camera added"),
        }

        let _ = self.changes.send(CameraChange::Upserted(camera));
    }

    /// Delete a camera and notify subscribers
    pub async fn remove(&self, id: &str) -> Option<Camera> {
        let removed = self.cameras.write().await.remove(id);
        if removed.is_some() {
            info!(camera = %id, "Camera removed");
            let _ = self.changes.send(CameraChange::Removed(id.to_string()));
        }
        removed
    }

    pub async fn get(&self, id: &str) -> Option<Camera> {
        self.cameras.read().await.get(id).cloned()
    }

    /// Flip the enabled flag, emitting an update when it changed
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        let updated = {
            let mut cameras = self.cameras.write().await;
            match cameras.get_mut(id) {
                Some(camera) if camera.enabled != enabled => {
                    camera.enabled = enabled;
                    Some(camera.clone())
                }
                _ => None,
            }
        };

        match updated {
            Some(camera) => {
                info!(camera = %id, enabled, "Camera enabled flag changed");
                let _ = self.changes.send(CameraChange::Upserted(camera));
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl CameraCatalog for InMemoryCatalog {
    async fn list_cameras(&self) -> Vec<Camera> {
        let cameras = self.cameras.read().await;
        let mut list: Vec<Camera> = cameras.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    fn subscribe(&self) -> broadcast::Receiver<CameraChange> {
        self.changes.subscribe()
    }
}

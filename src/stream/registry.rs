// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! Supervisor registry - the single place that starts and stops cameras

use std::collections::HashMap;
use std::sync::Arc;
use anyhow::{bail, Result};
use parking_lot::RwLock;
use tracing::{info, warn};

use super::source::SourceFactory;
use super::supervisor::StreamSupervisor;
use super::{Frame, StreamConfig};
use crate::camera::{Camera, CameraHealth};
use crate::core::EventBus;
use crate::error::NotAvailable;
use crate::inference::InferenceScheduler;
use crate::streaming::BroadcastHub;

/// Tracks one supervisor per running camera
pub struct SupervisorRegistry {
    supervisors: RwLock<HashMap<String, StreamSupervisor>>,
    factory: Arc<dyn SourceFactory>,
    hub: Arc<BroadcastHub>,
    scheduler: Arc<InferenceScheduler>,
    bus: Arc<EventBus>,
    config: StreamConfig,
}

impl SupervisorRegistry {
    pub fn new(
        factory: Arc<dyn SourceFactory>,
        hub: Arc<BroadcastHub>,
        scheduler: Arc<InferenceScheduler>,
        bus: Arc<EventBus>,
        config: StreamConfig,
    ) -> Self {
        Self {
            supervisors: RwLock::new(HashMap::new()),
            factory,
            hub,
            scheduler,
            bus,
            config,
        }
    }

    /// Start supervising `camera`. Fails if it is already running.
    pub fn start(&self, camera: &Camera) -> Result<()> {
        let slot = {
            let mut supervisors = self.supervisors.write();
            if supervisors.contains_key(&camera.id) {
                bail!("Camera already running: {}", camera.id);
            }

            let sup = StreamSupervisor::spawn(
                camera,
                self.factory.clone(),
                self.hub.clone(),
                self.bus.clone(),
                self.config.clone(),
            );
            let slot = sup.slot();
            supervisors.insert(camera.id.clone(), sup);
            slot
        };

        self.scheduler.register(camera, slot);
        info!("Camera started: {}", camera.id);
        Ok(())
    }

    /// Stop a camera. Returns false if it was not running.
    pub async fn stop(&self, camera_id: &str) -> bool {
        let sup = self.supervisors.write().remove(camera_id);
        match sup {
            Some(sup) => {
                self.scheduler.deregister(camera_id);
                self.hub.remove_camera(camera_id);
                sup.stop().await;
                info!("Camera stopped: {}", camera_id);
                true
            }
            None => false,
        }
    }

    /// Bring the running set in line with one camera record
    pub async fn apply(&self, camera: &Camera) -> Result<()> {
        let running = self.is_running(&camera.id);

        if !camera.enabled {
            if running {
                self.stop(&camera.id).await;
            }
            return Ok(());
        }

        if !running {
            return self.start(camera);
        }

        if self.scheduler.camera(&camera.id).map_or(true, |old| old.needs_reconnect(camera)) {
            info!("Camera {} changed source, restarting", camera.id);
            self.stop(&camera.id).await;
            self.start(camera)
        } else {
            self.scheduler.update_camera(camera);
            Ok(())
        }
    }

    pub fn is_running(&self, camera_id: &str) -> bool {
        self.supervisors.read().contains_key(camera_id)
    }

    pub fn camera_ids(&self) -> Vec<String> {
        self.supervisors.read().keys().cloned().collect()
    }

    /// Latest frame for a camera, if any
    pub fn sample(&self, camera_id: &str) -> Option<Frame> {
        self.supervisors.read().get(camera_id).and_then(|s| s.sample())
    }

    /// On-demand snapshot of the latest frame
    pub fn snapshot(&self, camera_id: &str) -> Result<Frame, NotAvailable> {
        self.sample(camera_id).ok_or_else(|| NotAvailable::new(camera_id))
    }

    pub fn health(&self, camera_id: &str) -> Option<CameraHealth> {
        self.supervisors.read().get(camera_id).map(|s| s.health_status())
    }

    pub fn all_health(&self) -> Vec<CameraHealth> {
        let mut all: Vec<CameraHealth> = self
            .supervisors
            .read()
            .values()
            .map(|s| s.health_status())
            .collect();
        all.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));
        all
    }

    pub async fn stop_all(&self) {
        let ids = self.camera_ids();
        if !ids.is_empty() {
            info!("Stopping {} camera(s)", ids.len());
        }
        for id in ids {
            if !self.stop(&id).await {
                warn!("Camera {} vanished during shutdown", id);
            }
        }
    }
}

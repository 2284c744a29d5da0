// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! Configuration module

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::camera::Camera;
use crate::events::EventsConfig;
use crate::inference::{InferenceConfig, ModelConfig};
use crate::stream::StreamConfig;
use crate::streaming::LiveConfig;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level used when no CLI flag or `RUST_LOG` overrides it
    pub log_level: String,

    /// Add synthetic cameras when none are configured
    pub demo_mode: bool,

    /// Camera records seeding the catalog
    pub cameras: Vec<Camera>,

    pub stream: StreamConfig,

    /// Inference scheduling
    pub scheduler: InferenceConfig,

    pub model: ModelConfig,

    /// Event creation and persistence retries
    pub events: EventsConfig,

    /// Live view
    pub live: LiveConfig,

    pub database: DatabaseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            demo_mode: false,
            cameras: Vec::new(),
            stream: StreamConfig::default(),
            scheduler: InferenceConfig::default(),
            model: ModelConfig::default(),
            events: EventsConfig::default(),
            live: LiveConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Load or create default configuration
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            config.save(path)?;
            Ok(config)
        }
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for camera in &self.cameras {
            if camera.id.trim().is_empty() {
                bail!("Camera with empty id");
            }
            if !seen.insert(camera.id.as_str()) {
                bail!("Duplicate camera id: {}", camera.id);
            }
            if camera.uri.trim().is_empty() {
                bail!("Camera {} has no uri", camera.id);
            }
            if camera.interval_ms == 0 {
                bail!("Camera {} has a zero inference interval", camera.id);
            }
            for (class, threshold) in &camera.thresholds {
                if !(0.0..=1.0).contains(threshold) {
                    bail!("Camera {}: threshold for {} out of range: {}", camera.id, class, threshold);
                }
            }
        }

        if self.scheduler.workers == 0 {
            bail!("scheduler.workers must be at least 1");
        }

        Ok(())
    }

    /// Put the database and snapshots under `data_dir`
    pub fn set_data_dir(&mut self, data_dir: &Path) {
        self.database.path = data_dir.join("vigil.db");
        self.database.snapshot_dir = data_dir.join("snapshots");
    }

    /// Synthetic cameras for running without hardware
    pub fn demo_cameras() -> Vec<Camera> {
        vec![
            Camera::new("demo-front", "stub://front?fps=10"),
            Camera::new("demo-yard", "stub://yard?fps=5&width=640&height=480"),
            Camera::new("demo-flaky", "stub://flaky?fps=10&fail_after=200&corrupt_every=25"),
        ]
    }

    /// Get configuration directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("vigil"))
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    /// Get default configuration path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Default location for the database and snapshots
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .map(|d| d.join("vigil"))
            .unwrap_or_else(|| PathBuf::from("./data"))
    }
}

/// Event persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Persist events to SQLite. In-memory only when disabled.
    pub enabled: bool,

    /// Database path
    pub path: PathBuf,

    /// Directory receiving snapshot JPEGs
    pub snapshot_dir: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let data_dir = Config::data_dir();
        Self {
            enabled: true,
            path: data_dir.join("vigil.db"),
            snapshot_dir: data_dir.join("snapshots"),
        }
    }
}

// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! Main engine - owns every pipeline component and follows the camera catalog

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use anyhow::{bail, Result};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{EventBus, SystemState};
use crate::camera::{Camera, CameraCatalog, CameraChange, CameraStatus, HealthStatus, InMemoryCatalog};
use crate::config::Config;
use crate::error::NotAvailable;
use crate::events::{Event, EventEmitter};
use crate::inference::{load_model, Detection, DetectionHandler, InferenceScheduler, ModelHandle, ModelRegistry};
use crate::storage::{EventQuery, EventSink, EventStats, EventStore, MemoryStore, SqliteStore};
use crate::stream::{DefaultSourceFactory, Frame, SourceFactory, SupervisorRegistry};
use crate::streaming::{BroadcastHub, LiveViewServer, Subscription};

const BUS_CAPACITY: usize = 1024;
const TASK_STOP_GRACE: Duration = Duration::from_secs(5);

/// Collaborators the engine is assembled from
pub struct EngineParts {
    pub catalog: Arc<dyn CameraCatalog>,
    pub sources: Arc<dyn SourceFactory>,
    pub models: Arc<ModelRegistry>,
    pub store: Arc<dyn EventStore>,
    pub sink: Arc<dyn EventSink>,
}

impl EngineParts {
    /// Catalog, sources, model and store as described by the configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let catalog: Arc<dyn CameraCatalog> = Arc::new(InMemoryCatalog::new(config.cameras.clone()));
        let sources: Arc<dyn SourceFactory> = Arc::new(DefaultSourceFactory::new(config.stream.clone()));
        let models = Arc::new(ModelRegistry::new(load_model(&config.model)?));
        let memory = Arc::new(MemoryStore::new());

        let parts = Self {
            catalog,
            sources,
            models,
            store: memory.clone(),
            sink: memory,
        };

        if config.database.enabled {
            Ok(parts.with_store(Arc::new(SqliteStore::open(&config.database)?)))
        } else {
            info!("Persistence disabled, events are kept in memory");
            Ok(parts)
        }
    }

    /// Use `store` for both writing and querying events
    pub fn with_store<S: EventStore + 'static>(mut self, store: Arc<S>) -> Self {
        self.store = store.clone();
        self.sink = store;
        self
    }
}

/// Routes detector output to the live overlay and the event emitter
struct Pipeline {
    hub: Arc<BroadcastHub>,
    emitter: Arc<EventEmitter>,
}

impl DetectionHandler for Pipeline {
    fn handle(&self, camera: &Camera, frame: &Frame, detections: Vec<Detection>) {
        self.emitter.submit(camera, frame, &detections);
        self.hub.post_detections(&camera.id, detections);
    }
}

/// Main vigil engine
pub struct Engine {
    pub config: Arc<Config>,
    state: Arc<RwLock<SystemState>>,
    start_time: Option<Instant>,
    catalog: Arc<dyn CameraCatalog>,
    models: Arc<ModelRegistry>,
    store: Arc<dyn EventStore>,
    bus: Arc<EventBus>,
    hub: Arc<BroadcastHub>,
    scheduler: Arc<InferenceScheduler>,
    emitter: Arc<EventEmitter>,
    registry: Arc<SupervisorRegistry>,
    live: Option<LiveViewServer>,
    live_addr: Option<SocketAddr>,
    cancel: CancellationToken,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    pub async fn new(config: Config) -> Result<Self> {
        let parts = EngineParts::from_config(&config)?;
        Ok(Self::assemble(config, parts))
    }

    /// Build an engine around explicit collaborators
    pub fn assemble(config: Config, parts: EngineParts) -> Self {
        let config = Arc::new(config);
        let bus = Arc::new(EventBus::new(BUS_CAPACITY));
        let hub = Arc::new(BroadcastHub::new(&config.live));
        let scheduler = Arc::new(InferenceScheduler::new(config.scheduler.clone(), parts.models.clone()));
        let emitter = Arc::new(EventEmitter::new(config.events.clone(), parts.sink, bus.clone()));
        let registry = Arc::new(SupervisorRegistry::new(
            parts.sources,
            hub.clone(),
            scheduler.clone(),
            bus.clone(),
            config.stream.clone(),
        ));

        let live = if config.live.websocket_enabled {
            Some(LiveViewServer::new(&config.live, hub.clone(), bus.clone()))
        } else {
            None
        };

        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            state: Arc::new(RwLock::new(SystemState::default())),
            start_time: None,
            catalog: parts.catalog,
            models: parts.models,
            store: parts.store,
            bus,
            hub,
            scheduler,
            emitter,
            registry,
            live,
            live_addr: None,
            cancel: CancellationToken::new(),
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.state.read().await.running {
            bail!("Engine already running");
        }

        info!("Starting vigil engine...");
        self.start_time = Some(Instant::now());
        self.cancel = CancellationToken::new();

        let pipeline = Arc::new(Pipeline {
            hub: self.hub.clone(),
            emitter: self.emitter.clone(),
        });
        let workers = self.scheduler.start(pipeline, self.cancel.clone());
        self.tasks.extend(workers);

        self.tasks.push(tokio::spawn(track_events(
            self.bus.subscribe_events(),
            self.state.clone(),
            self.cancel.clone(),
        )));

        // subscribe before listing so no change slips between the two
        let changes = self.catalog.subscribe();
        for camera in self.catalog.list_cameras().await {
            if let Err(e) = self.registry.apply(&camera).await {
                warn!(camera = %camera.id, "Failed to start camera: {}", e);
            }
        }

        self.tasks.push(tokio::spawn(follow_catalog(
            self.catalog.clone(),
            changes,
            self.registry.clone(),
            self.emitter.clone(),
            self.cancel.clone(),
        )));

        if let Some(server) = &self.live {
            match server.start(self.shutdown_tx.subscribe()).await {
                Ok(addr) => self.live_addr = Some(addr),
                Err(e) => warn!("Live view server unavailable: {}", e),
            }
        }

        self.state.write().await.running = true;
        info!("Vigil engine started with {} camera(s)", self.registry.camera_ids().len());
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        info!("Stopping vigil engine...");

        self.cancel.cancel();
        let _ = self.shutdown_tx.send(());
        self.registry.stop_all().await;

        for handle in self.tasks.drain(..) {
            let abort = handle.abort_handle();
            if tokio::time::timeout(TASK_STOP_GRACE, handle).await.is_err() {
                warn!("Engine task did not stop in time, aborting");
                abort.abort();
            }
        }

        self.live_addr = None;
        self.state.write().await.running = false;

        info!("Vigil engine stopped");
        Ok(())
    }

    pub async fn state(&self) -> SystemState {
        let mut state = self.state.read().await.clone();
        let cameras = self.catalog.list_cameras().await;
        let health = self.registry.all_health();
        let model = self.models.active();

        state.cameras_configured = cameras.len();
        state.cameras_online = health.iter().filter(|h| h.status == HealthStatus::Online).count();
        state.frames_received = health.iter().map(|h| h.frames_received).sum();
        state.live_viewers = cameras.iter().map(|c| self.hub.subscriber_count(&c.id)).sum();
        state.uptime_seconds = self.uptime();
        state.model = format!("{} v{}", model.id(), model.version());
        state.inference = self.scheduler.stats();
        state.events = self.emitter.stats();
        state
    }

    pub fn uptime(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Latest frame of a running camera
    pub fn snapshot(&self, camera_id: &str) -> Result<Frame, NotAvailable> {
        self.registry.snapshot(camera_id)
    }

    /// Every catalog camera with the health of its stream, if running
    pub async fn cameras_with_health(&self) -> Vec<CameraStatus> {
        self.catalog
            .list_cameras()
            .await
            .into_iter()
            .map(|camera| {
                let health = self.registry.health(&camera.id);
                CameraStatus { camera, health }
            })
            .collect()
    }

    pub fn running_cameras(&self) -> Vec<String> {
        self.registry.camera_ids()
    }

    /// Replace the active model. Requests already admitted finish on the old one.
    pub fn swap_model(&self, handle: ModelHandle) {
        let previous = self.models.swap(handle);
        let current = self.models.active();
        info!(
            "Model swapped: {} v{} -> {} v{}",
            previous.id(),
            previous.version(),
            current.id(),
            current.version()
        );
        self.bus.publish_alert("info", &format!("Model {} v{} active", current.id(), current.version()));
    }

    pub async fn query_events(&self, query: &EventQuery) -> Result<Vec<Event>> {
        self.store.query_events(query).await
    }

    pub async fn event_stats(&self) -> Result<EventStats> {
        self.store.stats().await
    }

    /// Watch a camera's frames in-process
    pub fn subscribe_live(&self, camera_id: &str, overlay: bool) -> Subscription {
        self.hub.subscribe(camera_id, overlay)
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    /// Bound address of the live view server once started
    pub fn live_addr(&self) -> Option<SocketAddr> {
        self.live_addr
    }
}

/// Apply catalog changes to the supervisor registry until cancelled
async fn follow_catalog(
    catalog: Arc<dyn CameraCatalog>,
    mut changes: broadcast::Receiver<CameraChange>,
    registry: Arc<SupervisorRegistry>,
    emitter: Arc<EventEmitter>,
    cancel: CancellationToken,
) {
    loop {
        let change = tokio::select! {
            _ = cancel.cancelled() => break,
            change = changes.recv() => change,
        };

        match change {
            Ok(CameraChange::Upserted(camera)) => {
                debug!(camera = %camera.id, enabled = camera.enabled, "Catalog update");
                // deregister first, then drop correlation state
                if let Err(e) = registry.apply(&camera).await {
                    warn!(camera = %camera.id, "Failed to apply camera update: {}", e);
                }
                if !camera.enabled {
                    emitter.forget_camera(&camera.id);
                }
            }
            Ok(CameraChange::Removed(id)) => {
                registry.stop(&id).await;
                emitter.forget_camera(&id);
            }
            Err(RecvError::Lagged(missed)) => {
                warn!("Missed {} catalog changes, resynchronising", missed);
                resync(catalog.as_ref(), &registry, &emitter).await;
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn resync(catalog: &dyn CameraCatalog, registry: &SupervisorRegistry, emitter: &EventEmitter) {
    let cameras = catalog.list_cameras().await;

    for id in registry.camera_ids() {
        if !cameras.iter().any(|c| c.id == id) {
            registry.stop(&id).await;
            emitter.forget_camera(&id);
        }
    }

    for camera in &cameras {
        if let Err(e) = registry.apply(camera).await {
            warn!(camera = %camera.id, "Failed to apply camera: {}", e);
        }
    }
}

async fn track_events(
    mut events: broadcast::Receiver<Event>,
    state: Arc<RwLock<SystemState>>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Ok(event) => {
                let mut state = state.write().await;
                if state.last_event.map_or(true, |t| event.timestamp > t) {
                    state.last_event = Some(event.timestamp);
                }
            }
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
}

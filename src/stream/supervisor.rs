// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! Stream supervisor - one per enabled camera
//!
//! ```text
//! Idle -> Connecting -> Streaming -> Reconnecting -> Connecting ...
//!            \              \             \
//!             +--------------+-------------+--> Stopped
//! ```

use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::source::{FrameSource, SourceFactory};
use super::{Frame, StreamConfig};
use crate::camera::{Camera, CameraHealth, HealthStatus};
use crate::core::{Backoff, EventBus};
use crate::error::SourceError;
use crate::streaming::BroadcastHub;

/// Supervisor lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Connecting,
    Streaming,
    Reconnecting,
    Stopped,
}

/// Latest-frame cell shared between a supervisor and its readers.
///
/// Overwrite semantics: the producer never waits and older frames are gone.
#[derive(Default)]
pub struct FrameSlot {
    latest: RwLock<Option<Frame>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent frame without consuming it
    pub fn sample(&self) -> Option<Frame> {
        self.latest.read().clone()
    }

    pub fn store(&self, frame: Frame) {
        *self.latest.write() = Some(frame);
    }
}

/// Owns one camera's frame source and keeps it alive
pub struct StreamSupervisor {
    camera_id: String,
    slot: Arc<FrameSlot>,
    health: Arc<RwLock<CameraHealth>>,
    state: Arc<RwLock<SupervisorState>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    stop_grace: Duration,
}

impl StreamSupervisor {
    /// Spawn the supervisor task for `camera`
    pub fn spawn(
        camera: &Camera,
        factory: Arc<dyn SourceFactory>,
        hub: Arc<BroadcastHub>,
        bus: Arc<EventBus>,
        config: StreamConfig,
    ) -> Self {
        let slot = Arc::new(FrameSlot::new());
        let health = Arc::new(RwLock::new(CameraHealth::new(&camera.id)));
        let state = Arc::new(RwLock::new(SupervisorState::Idle));
        let cancel = CancellationToken::new();
        let stop_grace = Duration::from_millis(config.stop_grace_ms);

        let runner = SupervisorTask {
            camera_id: camera.id.clone(),
            uri: camera.uri.clone(),
            factory,
            hub,
            bus,
            slot: slot.clone(),
            health: health.clone(),
            state: state.clone(),
            cancel: cancel.clone(),
            backoff: Backoff::new(config.backoff.clone()),
            config,
            sequence: 0,
        };

        let task = tokio::spawn(runner.run());
        info!(camera = %camera.id, "Stream supervisor started");

        Self {
            camera_id: camera.id.clone(),
            slot,
            health,
            state,
            cancel,
            task: Mutex::new(Some(task)),
            stop_grace,
        }
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn slot(&self) -> Arc<FrameSlot> {
        self.slot.clone()
    }

    pub fn sample(&self) -> Option<Frame> {
        self.slot.sample()
    }

    pub fn health_status(&self) -> CameraHealth {
        self.health.read().clone()
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.read()
    }

    /// Cancel the task and wait for it, aborting after the grace period
    pub async fn stop(self) {
        self.cancel.cancel();

        let handle = self.task.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(self.stop_grace, &mut handle).await.is_err() {
                warn!(camera = %self.camera_id, "Supervisor did not stop within {:?}, aborting", self.stop_grace);
                handle.abort();
            }
        }

        *self.state.write() = SupervisorState::Stopped;
        self.health.write().status = HealthStatus::Offline;
        info!(camera = %self.camera_id, "Stream supervisor stopped");
    }
}

enum StreamEnd {
    Cancelled,
    Failed(SourceError),
}

struct SupervisorTask {
    camera_id: String,
    uri: String,
    factory: Arc<dyn SourceFactory>,
    hub: Arc<BroadcastHub>,
    bus: Arc<EventBus>,
    slot: Arc<FrameSlot>,
    health: Arc<RwLock<CameraHealth>>,
    state: Arc<RwLock<SupervisorState>>,
    cancel: CancellationToken,
    backoff: Backoff,
    config: StreamConfig,
    sequence: u64,
}

impl SupervisorTask {
    async fn run(mut self) {
        loop {
            self.transition(SupervisorState::Connecting, HealthStatus::Connecting);

            let opened = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.factory.open(&self.camera_id, &self.uri) => result,
            };

            match opened {
                Ok(mut source) => {
                    self.backoff.reset();
                    self.health.write().connected_since = Some(Utc::now());
                    self.transition(SupervisorState::Streaming, HealthStatus::Online);
                    info!(camera = %self.camera_id, "Connected to {}", source.uri());

                    let end = self.stream(source.as_mut()).await;
                    source.close().await;

                    match end {
                        StreamEnd::Cancelled => break,
                        StreamEnd::Failed(e) => {
                            warn!(camera = %self.camera_id, kind = e.kind(), "Stream failed: {}", e);
                            self.record_error(&e);
                            self.transition(SupervisorState::Reconnecting, HealthStatus::Offline);
                        }
                    }
                }
                Err(e) => {
                    warn!(camera = %self.camera_id, kind = e.kind(), "Open failed: {}", e);
                    self.record_error(&e);
                    self.transition(SupervisorState::Reconnecting, HealthStatus::Error);
                }
            }

            let delay = self.backoff.next_delay();
            self.health.write().reconnect_count += 1;
            debug!(camera = %self.camera_id, "Reconnecting in {:?} (attempt {})", delay, self.backoff.attempts());

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        *self.state.write() = SupervisorState::Stopped;
        self.health.write().status = HealthStatus::Offline;
    }

    async fn stream(&mut self, source: &mut dyn FrameSource) -> StreamEnd {
        let silence = Duration::from_millis(self.config.max_silence_ms);
        let mut fps_start = Instant::now();
        let mut fps_frames = 0u32;

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return StreamEnd::Cancelled,
                result = tokio::time::timeout(silence, source.next_frame()) => result,
            };

            let frame = match next {
                Ok(Ok(frame)) => frame,
                Ok(Err(e)) => return StreamEnd::Failed(e),
                Err(_) => {
                    return StreamEnd::Failed(SourceError::Stream(format!(
                        "no frame for {:?}",
                        silence
                    )))
                }
            };

            self.sequence += 1;
            let mut frame = frame.with_sequence(self.sequence);
            frame.camera_id = self.camera_id.clone();

            self.slot.store(frame.clone());
            self.hub.publish(&self.camera_id, frame.clone());

            fps_frames += 1;
            let elapsed = fps_start.elapsed();
            let mut health = self.health.write();
            health.frames_received += 1;
            health.last_frame_at = Some(frame.captured_at);
            if elapsed >= Duration::from_secs(1) {
                health.fps_actual = fps_frames as f32 / elapsed.as_secs_f32();
                fps_frames = 0;
                fps_start = Instant::now();
            }
        }
    }

    fn record_error(&self, e: &SourceError) {
        let mut health = self.health.write();
        health.error_count += 1;
        health.last_error = Some(e.to_string());
    }

    fn transition(&self, state: SupervisorState, status: HealthStatus) {
        *self.state.write() = state;
        let snapshot = {
            let mut health = self.health.write();
            if health.status == status {
                return;
            }
            health.status = status;
            health.clone()
        };
        self.bus.publish_health(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::RgbImage;
    use std::sync::atomic::{AtomicU32, Ordering};
    use crate::core::BackoffConfig;
    use crate::stream::DefaultSourceFactory;
    use crate::streaming::LiveConfig;

    fn test_config() -> StreamConfig {
        StreamConfig {
            backoff: BackoffConfig {
                jitter: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn hub() -> Arc<BroadcastHub> {
        Arc::new(BroadcastHub::new(&LiveConfig::default()))
    }

    /// Fails every open and records when each attempt happened
    struct RefusingFactory {
        attempts: Arc<Mutex<Vec<Instant>>>,
    }

    #[async_trait]
    impl SourceFactory for RefusingFactory {
        async fn open(&self, _camera_id: &str, uri: &str) -> Result<Box<dyn FrameSource>, SourceError> {
            self.attempts.lock().push(Instant::now());
            Err(SourceError::connection(uri, "refused"))
        }
    }

    /// Source that goes silent forever after one frame
    struct StallingSource {
        sent: bool,
    }

    #[async_trait]
    impl FrameSource for StallingSource {
        fn uri(&self) -> &str {
            "test://stall"
        }

        async fn next_frame(&mut self) -> Result<Frame, SourceError> {
            if !self.sent {
                self.sent = true;
                return Ok(Frame::new("x", RgbImage::new(8, 8)));
            }
            std::future::pending().await
        }

        async fn close(&mut self) {}
    }

    struct StallingFactory {
        opens: Arc<AtomicU32>,
    }

    #[async_trait]
    impl SourceFactory for StallingFactory {
        async fn open(&self, _camera_id: &str, _uri: &str) -> Result<Box<dyn FrameSource>, SourceError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(StallingSource { sent: false }))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_delays_grow_and_cap() {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let factory = Arc::new(RefusingFactory { attempts: attempts.clone() });
        let camera = Camera::new("cam", "rtsp://unreachable");

        let sup = StreamSupervisor::spawn(&camera, factory, hub(), Arc::new(EventBus::new(16)), test_config());

        tokio::time::sleep(Duration::from_secs(400)).await;
        assert_eq!(sup.health_status().status, HealthStatus::Error);
        assert!(sup.health_status().error_count >= 8);
        sup.stop().await;

        let attempts = attempts.lock().clone();
        let gaps: Vec<u64> = attempts.windows(2).map(|w| (w[1] - w[0]).as_secs()).collect();
        assert_eq!(&gaps[..7], &[1, 2, 4, 8, 16, 32, 60]);
        assert!(gaps.windows(2).all(|g| g[1] >= g[0]));
        assert!(gaps.iter().all(|g| *g <= 60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_triggers_reconnect() {
        let opens = Arc::new(AtomicU32::new(0));
        let factory = Arc::new(StallingFactory { opens: opens.clone() });
        let camera = Camera::new("cam", "test://stall");

        let sup = StreamSupervisor::spawn(&camera, factory, hub(), Arc::new(EventBus::new(16)), test_config());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sup.health_status().status, HealthStatus::Online);
        assert_eq!(sup.sample().unwrap().sequence, 1);

        // 15s silence, then 1s backoff, then a second open
        tokio::time::sleep(Duration::from_secs(17)).await;
        assert_eq!(opens.load(Ordering::SeqCst), 2);
        assert!(sup.health_status().last_error.unwrap().contains("no frame"));

        // sequence keeps increasing across the reconnect
        assert_eq!(sup.sample().unwrap().sequence, 2);
        sup.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_strictly_increasing_across_failures() {
        let factory: Arc<dyn SourceFactory> = Arc::new(DefaultSourceFactory::new(test_config()));
        let camera = Camera::new("cam", "stub://cam?fps=20&width=16&height=16&fail_after=5");
        let hub = hub();
        let mut sub = hub.subscribe("cam", false);

        let sup = StreamSupervisor::spawn(&camera, factory, hub.clone(), Arc::new(EventBus::new(16)), test_config());

        let mut last = 0;
        for _ in 0..12 {
            let live = sub.recv().await.unwrap();
            assert!(live.frame.sequence > last);
            last = live.frame.sequence;
        }
        assert!(sup.health_status().reconnect_count >= 2);
        sup.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_prompt_and_terminal() {
        let factory: Arc<dyn SourceFactory> = Arc::new(DefaultSourceFactory::new(test_config()));
        let camera = Camera::new("cam", "stub://cam?fps=5&width=16&height=16");
        let sup = StreamSupervisor::spawn(&camera, factory, hub(), Arc::new(EventBus::new(16)), test_config());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(sup.state(), SupervisorState::Streaming);

        let state = sup.state.clone();
        let started = Instant::now();
        sup.stop().await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(*state.read(), SupervisorState::Stopped);
    }
}

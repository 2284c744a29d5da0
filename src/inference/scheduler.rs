// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! Inference scheduler.
//!
//! One admission task walks the registered cameras round-robin every tick and
//! moves due frames into a bounded queue; a fixed pool of workers drains the
//! queue and runs the detector on the blocking pool under a timeout.
//!
//! A detector call holds one of `workers` permits until it returns, even after
//! its result has been abandoned to the timeout.
//!
//! Each camera has at most one request queued or in flight. A newer frame
//! replaces the camera's queued request in place, so per-camera results are
//! delivered in frame order.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::detector::infer;
use super::model::{ModelHandle, ModelRegistry};
use super::{Detection, InferenceConfig};
use crate::camera::Camera;
use crate::error::InferenceError;
use crate::stream::{Frame, FrameSlot};

/// Receives detector output, on the worker that produced it
pub trait DetectionHandler: Send + Sync {
    fn handle(&self, camera: &Camera, frame: &Frame, detections: Vec<Detection>);
}

/// Counters since startup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub admitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    /// Queued requests superseded by a newer frame
    pub replaced: u64,
    /// Results thrown away because their camera was removed
    pub discarded: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Idle,
    Queued,
    InFlight,
}

struct CameraEntry {
    camera: Camera,
    slot: Arc<FrameSlot>,
    generation: u64,
    last_admitted: Option<Instant>,
    last_sequence: u64,
    state: JobState,
}

impl CameraEntry {
    fn is_due(&self, now: Instant) -> bool {
        match self.last_admitted {
            Some(at) => now.saturating_duration_since(at) >= self.camera.interval(),
            None => true,
        }
    }
}

struct Job {
    camera_id: String,
    generation: u64,
    frame: Frame,
    model: Arc<ModelHandle>,
}

#[derive(Default)]
struct Inner {
    order: Vec<String>,
    entries: HashMap<String, CameraEntry>,
    queue: VecDeque<Job>,
    cursor: usize,
    next_generation: u64,
    stats: SchedulerStats,
}

pub struct InferenceScheduler {
    config: InferenceConfig,
    models: Arc<ModelRegistry>,
    inner: Mutex<Inner>,
    notify: Notify,
    gpu: Arc<Semaphore>,
}

impl InferenceScheduler {
    pub fn new(config: InferenceConfig, models: Arc<ModelRegistry>) -> Self {
        Self {
            models,
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            gpu: Arc::new(Semaphore::new(config.workers.max(1))),
            config,
        }
    }

    /// Start the admission loop and the worker pool
    pub fn start(self: &Arc<Self>, handler: Arc<dyn DetectionHandler>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let workers = self.config.workers.max(1);
        info!(
            "Inference scheduler starting: {} worker(s), queue depth {}, model {}",
            workers,
            self.config.effective_queue_depth(),
            self.models.active().id()
        );

        let mut handles = Vec::with_capacity(workers + 1);
        handles.push(tokio::spawn(self.clone().admission_loop(cancel.clone())));
        for index in 0..workers {
            handles.push(tokio::spawn(self.clone().worker(index, handler.clone(), cancel.clone())));
        }
        handles
    }

    /// Add a camera to the rotation
    pub fn register(&self, camera: &Camera, slot: Arc<FrameSlot>) {
        let mut inner = self.inner.lock();
        let generation = inner.next_generation;
        inner.next_generation += 1;

        if !inner.order.contains(&camera.id) {
            inner.order.push(camera.id.clone());
        }
        inner.entries.insert(
            camera.id.clone(),
            CameraEntry {
                camera: camera.clone(),
                slot,
                generation,
                last_admitted: None,
                last_sequence: 0,
                state: JobState::Idle,
            },
        );
        debug!(camera = %camera.id, "Registered for inference");
    }

    /// Remove a camera. Queued requests go at once; in-flight results are discarded.
    pub fn deregister(&self, camera_id: &str) {
        let mut inner = self.inner.lock();
        if inner.entries.remove(camera_id).is_none() {
            return;
        }

        if let Some(index) = inner.order.iter().position(|id| id == camera_id) {
            inner.order.remove(index);
            if index < inner.cursor {
                inner.cursor -= 1;
            }
        }
        inner.queue.retain(|job| job.camera_id != camera_id);
        debug!(camera = %camera_id, "Deregistered from inference");
    }

    /// Replace thresholds, interval and filters without touching scheduling state
    pub fn update_camera(&self, camera: &Camera) {
        if let Some(entry) = self.inner.lock().entries.get_mut(&camera.id) {
            entry.camera = camera.clone();
        }
    }

    pub fn camera(&self, camera_id: &str) -> Option<Camera> {
        self.inner.lock().entries.get(camera_id).map(|e| e.camera.clone())
    }

    pub fn stats(&self) -> SchedulerStats {
        self.inner.lock().stats.clone()
    }

    pub fn queue_len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// One round-robin pass. Returns the number of newly queued requests.
    fn admit_round(&self, now: Instant) -> usize {
        let depth = self.config.effective_queue_depth();
        let mut admitted = 0;

        {
            let mut inner = self.inner.lock();
            let Inner {
                order,
                entries,
                queue,
                cursor,
                stats,
                ..
            } = &mut *inner;

            let n = order.len();
            if n == 0 {
                return 0;
            }

            let start = *cursor % n;
            let mut blocked = None;

            for step in 0..n {
                let index = (start + step) % n;
                let entry = match entries.get_mut(&order[index]) {
                    Some(e) => e,
                    None => continue,
                };

                if entry.state == JobState::InFlight || !entry.is_due(now) {
                    continue;
                }

                let frame = match entry.slot.sample() {
                    Some(f) if f.sequence > entry.last_sequence => f,
                    _ => continue,
                };

                if entry.state == JobState::Queued {
                    if let Some(job) = queue.iter_mut().find(|j| j.camera_id == entry.camera.id) {
                        entry.last_sequence = frame.sequence;
                        job.frame = frame;
                        job.model = self.models.active();
                        stats.replaced += 1;
                    }
                    continue;
                }

                if queue.len() >= depth {
                    blocked = Some(index);
                    break;
                }

                entry.last_sequence = frame.sequence;
                entry.last_admitted = Some(now);
                entry.state = JobState::Queued;
                queue.push_back(Job {
                    camera_id: entry.camera.id.clone(),
                    generation: entry.generation,
                    frame,
                    model: self.models.active(),
                });
                stats.admitted += 1;
                admitted += 1;
            }

            // a camera turned away by a full queue goes first next round
            *cursor = blocked.unwrap_or((start + 1) % n);
        }

        for _ in 0..admitted {
            self.notify.notify_one();
        }
        admitted
    }

    fn take_job(&self) -> Option<Job> {
        let mut inner = self.inner.lock();
        let job = inner.queue.pop_front()?;
        if let Some(entry) = inner.entries.get_mut(&job.camera_id) {
            if entry.generation == job.generation {
                entry.state = JobState::InFlight;
            }
        }
        Some(job)
    }

    async fn next_job(&self) -> Job {
        loop {
            if let Some(job) = self.take_job() {
                return job;
            }
            self.notify.notified().await;
        }
    }

    /// Hand a result to `handler` unless its camera was removed meanwhile.
    ///
    /// The handler runs under the scheduler lock, so once `deregister`
    /// returns no further result for that camera is delivered.
    fn deliver(&self, job: &Job, detections: Vec<Detection>, handler: &dyn DetectionHandler) -> bool {
        let mut inner = self.inner.lock();
        let live = inner
            .entries
            .get(&job.camera_id)
            .filter(|e| e.generation == job.generation)
            .map(|e| e.camera.clone());
        let Some(camera) = live else {
            inner.stats.discarded += 1;
            return false;
        };
        inner.stats.completed += 1;
        handler.handle(&camera, &job.frame, detections);
        true
    }

    fn release(&self, job: &Job) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(&job.camera_id) {
            if entry.generation == job.generation {
                entry.state = JobState::Idle;
            }
        }
    }

    async fn admission_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(Duration::from_millis(self.config.tick_ms.max(1)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    self.admit_round(Instant::now());
                }
            }
        }
        debug!("Admission loop stopped");
    }

    async fn worker(self: Arc<Self>, index: usize, handler: Arc<dyn DetectionHandler>, cancel: CancellationToken) {
        loop {
            // a slot first, so no job waits in flight for the detector
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = self.gpu.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };
            let job = tokio::select! {
                _ = cancel.cancelled() => break,
                job = self.next_job() => job,
            };
            self.execute(&job, permit, handler.as_ref()).await;
            self.release(&job);
        }
        debug!("Inference worker {} stopped", index);
    }

    async fn execute(&self, job: &Job, permit: OwnedSemaphorePermit, handler: &dyn DetectionHandler) {
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let frame = job.frame.clone();
        let model = job.model.clone();

        let call = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            infer(&frame, &model)
        });
        let result = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(InferenceError::Backend(format!("inference task failed: {}", e))),
            Err(_) => Err(InferenceError::Timeout(timeout)),
        };

        match result {
            Ok(detections) => {
                if !self.deliver(job, detections, handler) {
                    debug!(camera = %job.camera_id, "Discarding result for removed camera");
                }
            }
            Err(e) => {
                {
                    let mut inner = self.inner.lock();
                    match e {
                        InferenceError::Timeout(_) => inner.stats.timed_out += 1,
                        _ => inner.stats.failed += 1,
                    }
                }
                warn!(
                    camera = %job.camera_id,
                    kind = e.kind(),
                    model = %job.model.id(),
                    sequence = job.frame.sequence,
                    "Inference failed, frame dropped: {}",
                    e
                );
            }
        }
    }
}

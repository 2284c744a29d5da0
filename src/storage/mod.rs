// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! Event storage - the sink contract and its implementations

mod sqlite;

pub use sqlite::SqliteStore;

use std::collections::{BTreeMap, HashMap};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WriteError;
use crate::events::{Event, EventType, SnapshotRef};

/// Where events and their snapshots are written.
///
/// A failed write is returned to the caller; the sink itself does not retry.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn write_event(&self, event: &Event) -> Result<(), WriteError>;

    async fn write_snapshot(&self, event_id: Uuid, camera_id: &str, jpeg: &[u8]) -> Result<SnapshotRef, WriteError>;
}

/// Read side for historical queries
#[async_trait]
pub trait EventStore: EventSink {
    async fn query_events(&self, query: &EventQuery) -> Result<Vec<Event>>;

    async fn stats(&self) -> Result<EventStats>;
}

/// Event filter, newest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventQuery {
    pub camera_id: Option<String>,
    pub event_type: Option<EventType>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub min_confidence: Option<f32>,
    pub limit: usize,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            camera_id: None,
            event_type: None,
            since: None,
            until: None,
            min_confidence: None,
            limit: 100,
        }
    }
}

impl EventQuery {
    pub fn camera(mut self, camera_id: &str) -> Self {
        self.camera_id = Some(camera_id.to_string());
        self
    }

    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.camera_id.as_ref().map_or(true, |c| *c == event.camera_id)
            && self.event_type.map_or(true, |t| t == event.event_type)
            && self.since.map_or(true, |t| event.timestamp >= t)
            && self.until.map_or(true, |t| event.timestamp <= t)
            && self.min_confidence.map_or(true, |c| event.confidence >= c)
    }
}

/// Aggregate counts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventStats {
    pub total: u64,
    pub by_type: BTreeMap<String, u64>,
    pub by_camera: BTreeMap<String, u64>,
    pub size_bytes: u64,
}

#[derive(Default)]
struct MemoryInner {
    events: Vec<Event>,
    snapshots: HashMap<Uuid, Vec<u8>>,
    fail_writes: usize,
    fail_snapshots: bool,
    write_attempts: usize,
}

/// In-process store used when persistence is disabled, and in tests
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` event writes
    pub fn fail_writes(&self, n: usize) {
        self.inner.lock().fail_writes = n;
    }

    pub fn fail_snapshots(&self, fail: bool) {
        self.inner.lock().fail_snapshots = fail;
    }

    pub fn events(&self) -> Vec<Event> {
        self.inner.lock().events.clone()
    }

    pub fn snapshot(&self, event_id: Uuid) -> Option<Vec<u8>> {
        self.inner.lock().snapshots.get(&event_id).cloned()
    }

    pub fn write_attempts(&self) -> usize {
        self.inner.lock().write_attempts
    }
}

#[async_trait]
impl EventSink for MemoryStore {
    async fn write_event(&self, event: &Event) -> Result<(), WriteError> {
        let mut inner = self.inner.lock();
        inner.write_attempts += 1;
        if inner.fail_writes > 0 {
            inner.fail_writes -= 1;
            return Err(WriteError::Rejected("store unavailable".into()));
        }
        inner.events.push(event.clone());
        Ok(())
    }

    async fn write_snapshot(&self, event_id: Uuid, camera_id: &str, jpeg: &[u8]) -> Result<SnapshotRef, WriteError> {
        let mut inner = self.inner.lock();
        if inner.fail_snapshots {
            return Err(WriteError::Rejected("snapshot store unavailable".into()));
        }
        inner.snapshots.insert(event_id, jpeg.to_vec());
        Ok(SnapshotRef {
            path: format!("memory://{}/{}.jpg", camera_id, event_id),
            size_bytes: jpeg.len() as u64,
        })
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn query_events(&self, query: &EventQuery) -> Result<Vec<Event>> {
        let inner = self.inner.lock();
        let mut found: Vec<Event> = inner.events.iter().filter(|e| query.matches(e)).cloned().collect();
        found.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        found.truncate(query.limit);
        Ok(found)
    }

    async fn stats(&self) -> Result<EventStats> {
        let inner = self.inner.lock();
        let mut stats = EventStats::default();
        for e in &inner.events {
            stats.total += 1;
            *stats.by_type.entry(e.event_type.to_string()).or_default() += 1;
            *stats.by_camera.entry(e.camera_id.clone()).or_default() += 1;
        }
        stats.size_bytes = inner.snapshots.values().map(|s| s.len() as u64).sum();
        Ok(stats)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use crate::inference::BoundingBox;

    pub(crate) fn sample_event(camera: &str, event_type: EventType, confidence: f32, secs: i64) -> Event {
        Event {
            id: Uuid::new_v4(),
            camera_id: camera.into(),
            event_type,
            class_name: event_type.as_str().into(),
            confidence,
            bbox: BoundingBox::new(1.0, 2.0, 3.0, 4.0),
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            sequence: secs as u64,
            window_id: Uuid::new_v4(),
            snapshot: None,
            detected_objects: vec![],
        }
    }

    #[tokio::test]
    async fn test_memory_query_and_stats() {
        let store = MemoryStore::new();
        store.write_event(&sample_event("a", EventType::Person, 0.9, 1)).await.unwrap();
        store.write_event(&sample_event("a", EventType::Vehicle, 0.6, 2)).await.unwrap();
        store.write_event(&sample_event("b", EventType::Person, 0.7, 3)).await.unwrap();

        let people = store.query_events(&EventQuery::default().event_type(EventType::Person)).await.unwrap();
        assert_eq!(people.len(), 2);
        assert_eq!(people[0].camera_id, "b");

        let limited = store.query_events(&EventQuery::default().camera("a").limit(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].event_type, EventType::Vehicle);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_type["person"], 2);
        assert_eq!(stats.by_camera["a"], 2);
    }

    #[tokio::test]
    async fn test_memory_failure_injection() {
        let store = MemoryStore::new();
        store.fail_writes(1);
        let event = sample_event("a", EventType::Animal, 0.8, 0);

        assert_eq!(store.write_event(&event).await.unwrap_err().kind(), "rejected");
        store.write_event(&event).await.unwrap();
        assert_eq!(store.write_attempts(), 2);
        assert_eq!(store.events().len(), 1);
    }
}

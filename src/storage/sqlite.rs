// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! SQLite event store. Snapshots live as JPEG files next to the database.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::Result;
use async_trait::async_trait;
use chrono::SecondsFormat;
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use tracing::{debug, info};
use uuid::Uuid;

use super::{EventQuery, EventSink, EventStats, EventStore};
use crate::config::DatabaseConfig;
use crate::error::WriteError;
use crate::events::{Event, SnapshotRef};

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    snapshot_dir: PathBuf,
}

impl SqliteStore {
    /// Open or create the database and snapshot directory
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::create_dir_all(&config.snapshot_dir)?;

        let conn = Connection::open(&config.path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        "#,
        )?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            snapshot_dir: config.snapshot_dir.clone(),
        };
        store.create_tables()?;

        info!("Event store opened at {:?}", config.path);
        Ok(store)
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                camera_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                class_name TEXT NOT NULL,
                confidence REAL NOT NULL,
                timestamp TEXT NOT NULL,
                snapshot_path TEXT,
                data TEXT NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_events_camera ON events(camera_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_events_type ON events(event_type);
        "#,
        )?;

        Ok(())
    }

    pub fn snapshot_path(&self, camera_id: &str, event_id: Uuid) -> PathBuf {
        self.snapshot_dir.join(format!("{}_{}.jpg", sanitize(camera_id), event_id))
    }

    fn insert(conn: &Connection, event: &Event) -> Result<(), WriteError> {
        let data = serde_json::to_string(event)?;
        conn.execute(
            r#"INSERT INTO events
               (id, camera_id, event_type, class_name, confidence, timestamp, snapshot_path, data)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            params![
                event.id.to_string(),
                event.camera_id,
                event.event_type.as_str(),
                event.class_name,
                event.confidence as f64,
                event.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                event.snapshot.as_ref().map(|s| s.path.clone()),
                data
            ],
        )?;
        Ok(())
    }

    fn select(conn: &Connection, query: &EventQuery) -> Result<Vec<Event>> {
        let mut sql = String::from("SELECT data FROM events WHERE 1 = 1");
        let mut values: Vec<Value> = Vec::new();

        if let Some(camera) = &query.camera_id {
            values.push(Value::Text(camera.clone()));
            sql.push_str(&format!(" AND camera_id = ?{}", values.len()));
        }
        if let Some(t) = query.event_type {
            values.push(Value::Text(t.as_str().to_string()));
            sql.push_str(&format!(" AND event_type = ?{}", values.len()));
        }
        if let Some(since) = query.since {
            values.push(Value::Text(since.to_rfc3339_opts(SecondsFormat::Millis, true)));
            sql.push_str(&format!(" AND timestamp >= ?{}", values.len()));
        }
        if let Some(until) = query.until {
            values.push(Value::Text(until.to_rfc3339_opts(SecondsFormat::Millis, true)));
            sql.push_str(&format!(" AND timestamp <= ?{}", values.len()));
        }
        if let Some(min) = query.min_confidence {
            values.push(Value::Real(min as f64));
            sql.push_str(&format!(" AND confidence >= ?{}", values.len()));
        }
        sql.push_str(&format!(" ORDER BY timestamp DESC LIMIT {}", query.limit));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| row.get::<_, String>(0))?;

        let mut events = Vec::new();
        for row in rows {
            events.push(serde_json::from_str(&row?)?);
        }
        Ok(events)
    }

    fn counts(conn: &Connection) -> Result<EventStats> {
        let mut stats = EventStats::default();

        let total: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        stats.total = total as u64;

        let mut stmt = conn.prepare("SELECT event_type, COUNT(*) FROM events GROUP BY event_type")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (k, n) = row?;
            stats.by_type.insert(k, n as u64);
        }

        let mut stmt = conn.prepare("SELECT camera_id, COUNT(*) FROM events GROUP BY camera_id")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (k, n) = row?;
            stats.by_camera.insert(k, n as u64);
        }

        stats.size_bytes = conn
            .query_row(
                "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
                [],
                |row| row.get::<_, i64>(0),
            )
            .unwrap_or(0) as u64;

        Ok(stats)
    }
}

/// Keep camera ids usable as file name components
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[async_trait]
impl EventSink for SqliteStore {
    async fn write_event(&self, event: &Event) -> Result<(), WriteError> {
        let conn = self.conn.clone();
        let event = event.clone();
        tokio::task::spawn_blocking(move || Self::insert(&conn.lock(), &event))
            .await
            .map_err(|e| WriteError::Rejected(format!("writer task failed: {}", e)))?
    }

    async fn write_snapshot(&self, event_id: Uuid, camera_id: &str, jpeg: &[u8]) -> Result<SnapshotRef, WriteError> {
        let path = self.snapshot_path(camera_id, event_id);
        tokio::fs::write(&path, jpeg).await?;
        debug!(camera = %camera_id, event = %event_id, "Snapshot saved to {:?}", path);

        Ok(SnapshotRef {
            path: path_string(&path),
            size_bytes: jpeg.len() as u64,
        })
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn query_events(&self, query: &EventQuery) -> Result<Vec<Event>> {
        let conn = self.conn.clone();
        let query = query.clone();
        tokio::task::spawn_blocking(move || Self::select(&conn.lock(), &query)).await?
    }

    async fn stats(&self) -> Result<EventStats> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || Self::counts(&conn.lock())).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use crate::storage::tests::sample_event;

    fn open(dir: &tempfile::TempDir) -> SqliteStore {
        let config = DatabaseConfig {
            enabled: true,
            path: dir.path().join("db").join("events.db"),
            snapshot_dir: dir.path().join("snapshots"),
        };
        SqliteStore::open(&config).unwrap()
    }

    #[tokio::test]
    async fn test_write_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);

        let mut first = sample_event("front door", EventType::Person, 0.91, 10);
        let reference = store.write_snapshot(first.id, &first.camera_id, &[0xFF, 0xD8, 0xFF, 0xD9]).await.unwrap();
        assert!(reference.path.ends_with(&format!("front_door_{}.jpg", first.id)));
        assert_eq!(reference.size_bytes, 4);
        first.snapshot = Some(reference);

        store.write_event(&first).await.unwrap();
        store.write_event(&sample_event("yard", EventType::Animal, 0.55, 20)).await.unwrap();
        store.write_event(&sample_event("yard", EventType::Vehicle, 0.75, 30)).await.unwrap();

        let all = store.query_events(&EventQuery::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].event_type, EventType::Vehicle);
        assert_eq!(all[2], first);

        let yard = store.query_events(&EventQuery::default().camera("yard")).await.unwrap();
        assert_eq!(yard.len(), 2);

        let confident = EventQuery {
            min_confidence: Some(0.7),
            since: Some(first.timestamp),
            ..Default::default()
        };
        assert_eq!(store.query_events(&confident).await.unwrap().len(), 2);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_camera["yard"], 2);
        assert_eq!(stats.by_type["person"], 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        let event = sample_event("a", EventType::Person, 0.9, 0);

        store.write_event(&event).await.unwrap();
        let err = store.write_event(&event).await.unwrap_err();
        assert_eq!(err.kind(), "database");
    }

    #[tokio::test]
    async fn test_reopen_keeps_events() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open(&dir);
            store.write_event(&sample_event("a", EventType::Custom, 0.6, 0)).await.unwrap();
        }
        let store = open(&dir);
        assert_eq!(store.stats().await.unwrap().total, 1);
    }
}

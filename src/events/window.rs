// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! Per camera and class correlation windows

use std::collections::HashMap;
use std::time::Duration;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Outcome of observing a qualifying detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correlation {
    /// A new window was opened; an event should be emitted
    Opened(Uuid),
    /// Folded into the open window
    Continued(Uuid),
}

#[derive(Debug, Clone)]
struct Window {
    id: Uuid,
    start: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

/// Suppresses repeat events for the same camera and class.
///
/// A window opens on the first qualifying detection. Later detections fold into
/// it until either `window` has passed since it opened or the gap since the
/// previous detection reaches `window`; the next detection then opens a new one.
/// Times are frame timestamps, never wall clock.
#[derive(Debug, Default)]
pub struct CorrelationTracker {
    windows: HashMap<(String, String), Window>,
}

impl CorrelationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, camera_id: &str, class_name: &str, at: DateTime<Utc>, window: Duration) -> Correlation {
        let span = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::max_value());
        let key = (camera_id.to_string(), class_name.to_string());

        if let Some(w) = self.windows.get_mut(&key) {
            let expired = at - w.start >= span || at - w.last_seen >= span;
            if !expired {
                if at > w.last_seen {
                    w.last_seen = at;
                }
                return Correlation::Continued(w.id);
            }
        }

        let id = Uuid::new_v4();
        self.windows.insert(
            key,
            Window {
                id,
                start: at,
                last_seen: at,
            },
        );
        Correlation::Opened(id)
    }

    /// Drop all windows for a camera
    pub fn forget_camera(&mut self, camera_id: &str) {
        self.windows.retain(|(camera, _), _| camera != camera_id);
    }

    pub fn open_windows(&self) -> usize {
        self.windows.len()
    }
}

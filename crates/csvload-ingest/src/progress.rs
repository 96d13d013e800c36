//! Progress events and their throttle

use serde::Serialize;

/// Snapshot of a session's progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub rows_loaded: usize,
    /// Known only once the load is complete
    pub total_rows: Option<usize>,
    pub is_complete: bool,
}

impl ProgressEvent {
    pub fn loading(rows_loaded: usize) -> Self {
        Self {
            rows_loaded,
            total_rows: None,
            is_complete: false,
        }
    }

    pub fn complete(rows: usize) -> Self {
        Self {
            rows_loaded: rows,
            total_rows: Some(rows),
            is_complete: true,
        }
    }
}

/// Emits at most one intermediate event per `interval` rows
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    interval: usize,
    last_reported: usize,
}

impl ProgressThrottle {
    pub fn new(interval: usize) -> Self {
        Self {
            interval: interval.max(1),
            last_reported: 0,
        }
    }

    /// Event for `rows` if a full interval passed since the last one
    pub fn observe(&mut self, rows: usize) -> Option<ProgressEvent> {
        if rows < self.last_reported.saturating_add(self.interval) {
            return None;
        }
        self.last_reported = rows;
        Some(ProgressEvent::loading(rows))
    }

    pub fn last_reported(&self) -> usize {
        self.last_reported
    }
}

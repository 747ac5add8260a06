//! Shared in-memory progress snapshots, one row per live task.
//!
//! Workers push updates through a throttled path (at most one accepted
//! update per task every 50 ms); consumers read point-in-time snapshots.
//! Nothing here is durable.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::store::TaskId;

/// Minimum spacing between accepted updates for one task.
const UPDATE_INTERVAL: Duration = Duration::from_millis(50);

/// Consumer-facing progress of one task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskProgress {
    pub downloaded_bytes: u64,
    /// 0 while the total is unknown.
    pub total_bytes: u64,
    pub bytes_per_second: f64,
}

impl TaskProgress {
    /// Fraction complete in [0.0, 1.0]; 0.0 while the total is unknown.
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.downloaded_bytes as f64 / self.total_bytes as f64).min(1.0)
    }

    /// Estimated seconds remaining (None if the rate is 0 or total unknown).
    pub fn eta_secs(&self) -> Option<f64> {
        if self.total_bytes == 0 {
            return None;
        }
        let remaining = self.total_bytes.saturating_sub(self.downloaded_bytes);
        if remaining == 0 {
            return Some(0.0);
        }
        if self.bytes_per_second <= 0.0 {
            return None;
        }
        Some(remaining as f64 / self.bytes_per_second)
    }
}

#[derive(Debug)]
struct Row {
    progress: TaskProgress,
    last_update: Instant,
    last_bytes: u64,
}

/// Process-global progress table. Single writer per row by convention
/// (the task's workers share one counter and one updater path).
#[derive(Debug, Default)]
pub struct ProgressBroadcaster {
    rows: RwLock<HashMap<TaskId, Row>>,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record progress for a task. Updates arriving within 50 ms of the last
    /// accepted one are dropped, except those that complete the task.
    pub fn update(&self, task_id: TaskId, downloaded_bytes: u64, total_bytes: u64) {
        let now = Instant::now();
        let mut rows = self.rows.write().unwrap();
        match rows.get_mut(&task_id) {
            Some(row) => {
                let elapsed = now.duration_since(row.last_update);
                let finished = total_bytes > 0 && downloaded_bytes >= total_bytes;
                if elapsed < UPDATE_INTERVAL && !finished {
                    return;
                }
                let delta = downloaded_bytes.saturating_sub(row.last_bytes);
                let secs = elapsed.as_secs_f64();
                if secs > 0.0 {
                    row.progress.bytes_per_second = delta as f64 / secs;
                }
                row.progress.downloaded_bytes = downloaded_bytes;
                row.progress.total_bytes = total_bytes;
                row.last_update = now;
                row.last_bytes = downloaded_bytes;
            }
            None => {
                rows.insert(
                    task_id,
                    Row {
                        progress: TaskProgress {
                            downloaded_bytes,
                            total_bytes,
                            bytes_per_second: 0.0,
                        },
                        last_update: now,
                        last_bytes: downloaded_bytes,
                    },
                );
            }
        }
    }

    /// Progress of one task, if it has a live row.
    pub fn get(&self, task_id: TaskId) -> Option<TaskProgress> {
        self.rows.read().unwrap().get(&task_id).map(|r| r.progress)
    }

    /// Point-in-time copy of every live row.
    pub fn snapshot(&self) -> Vec<(TaskId, TaskProgress)> {
        self.rows
            .read()
            .unwrap()
            .iter()
            .map(|(id, r)| (*id, r.progress))
            .collect()
    }

    /// Clear a task's row on terminal transition.
    pub fn remove(&self, task_id: TaskId) {
        self.rows.write().unwrap().remove(&task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_update_creates_row() {
        let b = ProgressBroadcaster::new();
        assert!(b.get(1).is_none());
        b.update(1, 100, 1000);
        let p = b.get(1).unwrap();
        assert_eq!(p.downloaded_bytes, 100);
        assert_eq!(p.total_bytes, 1000);
        assert!((p.fraction() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn updates_within_window_are_dropped() {
        let b = ProgressBroadcaster::new();
        b.update(1, 100, 1000);
        b.update(1, 200, 1000);
        // Second update landed inside the 50 ms window.
        assert_eq!(b.get(1).unwrap().downloaded_bytes, 100);
    }

    #[test]
    fn completion_update_always_lands() {
        let b = ProgressBroadcaster::new();
        b.update(1, 100, 1000);
        b.update(1, 1000, 1000);
        assert_eq!(b.get(1).unwrap().downloaded_bytes, 1000);
        assert_eq!(b.get(1).unwrap().eta_secs(), Some(0.0));
    }

    #[test]
    fn remove_clears_row() {
        let b = ProgressBroadcaster::new();
        b.update(7, 1, 2);
        b.update(8, 1, 2);
        assert_eq!(b.snapshot().len(), 2);
        b.remove(7);
        assert!(b.get(7).is_none());
        assert_eq!(b.snapshot().len(), 1);
    }

    #[test]
    fn unknown_total_has_no_eta() {
        let b = ProgressBroadcaster::new();
        b.update(1, 500, 0);
        let p = b.get(1).unwrap();
        assert_eq!(p.fraction(), 0.0);
        assert_eq!(p.eta_secs(), None);
    }
}

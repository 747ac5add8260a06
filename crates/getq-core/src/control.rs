//! Live-task registry: pause tokens and per-queue occupancy.
//!
//! Each running coordinator is registered with its queue and a pause token.
//! The control surface (CLI verbs, control socket) requests pause through
//! here; workers observe the token at chunk boundaries and stop cleanly.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::store::{QueueId, TaskId};

struct RunningTask {
    queue_id: QueueId,
    pause: Arc<AtomicBool>,
}

/// Shared registry of task id -> running coordinator state.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, RunningTask>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a starting coordinator; returns the pause token to hand it.
    pub fn register(&self, task_id: TaskId, queue_id: QueueId) -> Arc<AtomicBool> {
        let pause = Arc::new(AtomicBool::new(false));
        self.tasks.write().unwrap().insert(
            task_id,
            RunningTask {
                queue_id,
                pause: Arc::clone(&pause),
            },
        );
        pause
    }

    /// Unregister a finished coordinator (success, failure, or pause).
    pub fn unregister(&self, task_id: TaskId) {
        self.tasks.write().unwrap().remove(&task_id);
    }

    /// Request a cooperative pause. Returns false when the task has no live
    /// coordinator (callers then pause it directly in the store).
    pub fn request_pause(&self, task_id: TaskId) -> bool {
        match self.tasks.read().unwrap().get(&task_id) {
            Some(t) => {
                t.pause.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, task_id: TaskId) -> bool {
        self.tasks.read().unwrap().contains_key(&task_id)
    }

    /// Coordinators currently live for one queue. The scheduler uses this as
    /// the in-process truth for admission, covering the window before a
    /// freshly spawned coordinator persists its `connecting` status.
    pub fn count_for_queue(&self, queue_id: QueueId) -> usize {
        self.tasks
            .read()
            .unwrap()
            .values()
            .filter(|t| t.queue_id == queue_id)
            .count()
    }
}

/// Default path for the daemon control socket (same XDG state dir as the DB).
pub fn default_control_socket_path() -> std::io::Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("getq")?.get_state_home();
    Ok(dir.join("control.sock"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_pause_unregister() {
        let reg = TaskRegistry::new();
        assert!(!reg.request_pause(1));

        let token = reg.register(1, 10);
        assert!(reg.is_running(1));
        assert_eq!(reg.count_for_queue(10), 1);
        assert_eq!(reg.count_for_queue(11), 0);

        assert!(reg.request_pause(1));
        assert!(token.load(Ordering::Relaxed));

        reg.unregister(1);
        assert!(!reg.is_running(1));
        assert_eq!(reg.count_for_queue(10), 0);
    }
}

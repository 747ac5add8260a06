//! Cross-task admission control and scheduling.
//!
//! One pass per tick (default 1 s) and one per task event (insertion,
//! completion, failure, pause), so a finished task promotes the next
//! pending one without waiting for the timer. Admission itself is a pure
//! function over the queue's pending rows.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::GetqConfig;
use crate::control::TaskRegistry;
use crate::coordinator::TaskCoordinator;
use crate::limiter::RateLimiter;
use crate::progress::ProgressBroadcaster;
use crate::retry::RetryPolicy;
use crate::store::{QueueRow, Store, TaskId, TaskRow};

/// Events that trigger an immediate scheduling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEvent {
    /// A task was added or re-entered `pending`.
    Added(TaskId),
    /// A coordinator finished (complete, error, or paused).
    Finished(TaskId),
}

/// Admission for one queue: which pending tasks to start right now.
///
/// `active` is the number of live coordinators for the queue. Candidates are
/// ordered highest priority first, FIFO within equal priority. Inactive
/// queues start nothing.
pub fn plan_admission(pending: &[TaskRow], active: usize, queue: &QueueRow) -> Vec<TaskId> {
    if !queue.is_active {
        return Vec::new();
    }
    let budget = queue.effective_max().saturating_sub(active);
    if budget == 0 {
        return Vec::new();
    }
    let mut candidates: Vec<&TaskRow> = pending.iter().collect();
    candidates.sort_by_key(|t| (std::cmp::Reverse(t.priority), t.created_at, t.id));
    candidates.into_iter().take(budget).map(|t| t.id).collect()
}

/// The scheduler: owns the event loop that admits tasks and spawns
/// coordinators. Cloneable handles (`sender`) feed it events.
pub struct QueueManager {
    store: Store,
    cfg: GetqConfig,
    limiter: Arc<RateLimiter>,
    progress: Arc<ProgressBroadcaster>,
    registry: Arc<TaskRegistry>,
    retry: RetryPolicy,
    events_tx: mpsc::Sender<TaskEvent>,
    events_rx: mpsc::Receiver<TaskEvent>,
}

impl QueueManager {
    pub fn new(
        store: Store,
        cfg: GetqConfig,
        limiter: Arc<RateLimiter>,
        progress: Arc<ProgressBroadcaster>,
        registry: Arc<TaskRegistry>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(64);
        QueueManager {
            store,
            cfg,
            limiter,
            progress,
            registry,
            retry: RetryPolicy::default(),
            events_tx,
            events_rx,
        }
    }

    /// Override the workers' 503 backoff policy (tests shrink the delays).
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sender used by the ingest surface to wake the scheduler.
    pub fn sender(&self) -> mpsc::Sender<TaskEvent> {
        self.events_tx.clone()
    }

    /// Run the scheduling loop until the event channel closes and drains.
    /// Runs one pass per tick and one per received event.
    pub async fn run(mut self) {
        let tick = Duration::from_millis(self.cfg.scheduler_tick_ms.clamp(50, 1000));
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                event = self.events_rx.recv() => {
                    match event {
                        Some(event) => tracing::trace!(?event, "scheduler event"),
                        None => break,
                    }
                }
            }
            if let Err(e) = self.schedule_pass().await {
                tracing::warn!("scheduling pass failed: {:#}", e);
            }
        }
    }

    /// One admission pass over every queue.
    pub async fn schedule_pass(&self) -> Result<()> {
        self.store.ensure_default_queue().await?;
        for queue in self.store.list_queues().await? {
            if !queue.is_active {
                continue;
            }
            let active = self.registry.count_for_queue(queue.id);
            let pending = self.store.list_pending_in_queue(queue.id).await?;
            for task_id in plan_admission(&pending, active, &queue) {
                self.start_task(task_id, queue.id);
            }
        }
        Ok(())
    }

    /// Register and spawn a coordinator for one pending task.
    fn start_task(&self, task_id: TaskId, queue_id: i64) {
        if self.registry.is_running(task_id) {
            return;
        }
        let pause = self.registry.register(task_id, queue_id);
        let coordinator = TaskCoordinator::new(
            self.store.clone(),
            self.cfg.clone(),
            Arc::clone(&self.limiter),
            Arc::clone(&self.progress),
            task_id,
            pause,
        )
        .with_retry_policy(self.retry);
        let registry = Arc::clone(&self.registry);
        let events = self.events_tx.clone();
        let store = self.store.clone();
        tracing::info!(task = task_id, queue = queue_id, "starting task");
        tokio::spawn(async move {
            if let Err(e) = coordinator.run().await {
                tracing::error!(task = task_id, "coordinator infrastructure failure: {:#}", e);
                let _ = store
                    .set_task_error(task_id, &format!("internal error: {e:#}"))
                    .await;
            }
            registry.unregister(task_id);
            let _ = events.send(TaskEvent::Finished(task_id)).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Credentials, QueueMode, TaskStatus};

    fn task(id: TaskId, priority: i64, created_at: i64) -> TaskRow {
        TaskRow {
            id,
            source_url: format!("https://example.com/{id}"),
            resolved_url: None,
            destination_path: format!("/tmp/{id}"),
            total_size: 0,
            status: TaskStatus::Pending,
            etag: None,
            last_modified: None,
            credentials: Credentials::default(),
            connection_count: None,
            priority,
            created_at,
            queue_id: Some(1),
            error_message: None,
        }
    }

    fn queue(max_concurrent: usize, mode: QueueMode, is_active: bool) -> QueueRow {
        QueueRow {
            id: 1,
            name: "q".into(),
            is_active,
            max_concurrent,
            mode,
        }
    }

    #[test]
    fn admits_by_priority_then_fifo() {
        // Priorities 0, 10, 5 -> the 10 and the 5 start first.
        let pending = vec![task(1, 0, 100), task(2, 10, 101), task(3, 5, 102)];
        let q = queue(2, QueueMode::Parallel, true);
        assert_eq!(plan_admission(&pending, 0, &q), vec![2, 3]);
    }

    #[test]
    fn fifo_breaks_priority_ties() {
        let pending = vec![task(5, 1, 200), task(4, 1, 100), task(6, 1, 100)];
        let q = queue(3, QueueMode::Parallel, true);
        // created_at 100 twice: smaller id first, newest last.
        assert_eq!(plan_admission(&pending, 0, &q), vec![4, 6, 5]);
    }

    #[test]
    fn budget_subtracts_active() {
        let pending = vec![task(1, 0, 1), task(2, 0, 2)];
        let q = queue(3, QueueMode::Parallel, true);
        assert_eq!(plan_admission(&pending, 2, &q), vec![1]);
        assert_eq!(plan_admission(&pending, 3, &q), Vec::<TaskId>::new());
        assert_eq!(plan_admission(&pending, 4, &q), Vec::<TaskId>::new());
    }

    #[test]
    fn sequential_mode_admits_one() {
        let pending = vec![task(1, 0, 1), task(2, 0, 2)];
        let q = queue(8, QueueMode::Sequential, true);
        assert_eq!(plan_admission(&pending, 0, &q), vec![1]);
        assert_eq!(plan_admission(&pending, 1, &q), Vec::<TaskId>::new());
    }

    #[test]
    fn inactive_queue_admits_nothing() {
        let pending = vec![task(1, 0, 1)];
        let q = queue(3, QueueMode::Parallel, false);
        assert_eq!(plan_admission(&pending, 0, &q), Vec::<TaskId>::new());
    }

    #[test]
    fn promotion_order_matches_spec_scenario() {
        // Queue max 2; A,B,C with priorities 0,10,5: B and C run, A waits.
        let a = task(1, 0, 100);
        let b = task(2, 10, 101);
        let c = task(3, 5, 102);
        let q = queue(2, QueueMode::Parallel, true);
        let first = plan_admission(&[a.clone(), b, c.clone()], 0, &q);
        assert_eq!(first, vec![2, 3]);
        // B completes: only A is still pending, C still active.
        let second = plan_admission(&[a], 1, &q);
        assert_eq!(second, vec![1]);
    }
}

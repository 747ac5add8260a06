//! Per-task coordinator: the download state machine.
//!
//! Drives one task from `connecting` through `running` to a terminal state:
//! probes the origin, validates pinned validators, partitions the file,
//! supervises segment workers, bisects slow tails to keep the connection
//! budget busy, and checkpoints progress so any interruption resumes
//! bit-identically.

mod checkpoint;
mod plan;

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use checkpoint::Checkpointer;
use plan::{pick_split_target, plan_initial_segments};

use crate::config::GetqConfig;
use crate::error::{DownloadError, TaskPaused};
use crate::limiter::RateLimiter;
use crate::probe::{self, ProbeResult};
use crate::progress::ProgressBroadcaster;
use crate::retry::RetryPolicy;
use crate::store::{Credentials, NewSegment, SegmentRow, Store, TaskId, TaskStatus};
use crate::transport::Transport;
use crate::worker::{self, SegmentOutcome, SegmentState, WorkerCtx};
use crate::writer::DestFile;

/// Coordinator for a single task. Constructed per run; a resume builds a
/// fresh one.
pub struct TaskCoordinator {
    store: Store,
    cfg: GetqConfig,
    limiter: Arc<RateLimiter>,
    progress: Arc<ProgressBroadcaster>,
    task_id: TaskId,
    pause: Arc<AtomicBool>,
    retry: RetryPolicy,
}

/// Shared per-run context handed to every worker spawn.
struct RunCtx {
    transport: Transport,
    url: String,
    creds: Credentials,
    dest: DestFile,
    downloaded: Arc<AtomicU64>,
    total_size: u64,
    connections: usize,
}

/// What the supervision loop ended with.
#[derive(Default)]
struct SuperviseEnd {
    paused: bool,
    first_error: Option<DownloadError>,
    discovered_total: Option<u64>,
}

impl TaskCoordinator {
    pub fn new(
        store: Store,
        cfg: GetqConfig,
        limiter: Arc<RateLimiter>,
        progress: Arc<ProgressBroadcaster>,
        task_id: TaskId,
        pause: Arc<AtomicBool>,
    ) -> Self {
        TaskCoordinator {
            store,
            cfg,
            limiter,
            progress,
            task_id,
            pause,
            retry: RetryPolicy::default(),
        }
    }

    /// Override the 503 backoff policy (tests shrink the delays).
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn paused(&self) -> bool {
        self.pause.load(Ordering::Relaxed)
    }

    /// Run the task to a terminal or paused state. Transfer failures are
    /// recorded on the task row; only infrastructure faults (store I/O)
    /// surface as `Err`.
    pub async fn run(&self) -> Result<()> {
        match self.drive().await {
            Ok(()) => Ok(()),
            Err(e) => {
                if e.downcast_ref::<TaskPaused>().is_some() {
                    self.store
                        .set_task_status(self.task_id, TaskStatus::Paused)
                        .await?;
                    tracing::info!(task = self.task_id, "task paused");
                    return Ok(());
                }
                if let Some(derr) = e.downcast_ref::<DownloadError>() {
                    let message = format!("{}: {}", derr.kind(), derr);
                    self.store.set_task_error(self.task_id, &message).await?;
                    self.progress.remove(self.task_id);
                    tracing::warn!(task = self.task_id, "task failed: {}", message);
                    return Ok(());
                }
                Err(e)
            }
        }
    }

    async fn drive(&self) -> Result<()> {
        let task = self
            .store
            .get_task(self.task_id)
            .await?
            .with_context(|| format!("task {} not found", self.task_id))?;

        // Starting a finished task is a no-op.
        if task.status == TaskStatus::Complete {
            return Ok(());
        }

        self.store
            .set_task_status(self.task_id, TaskStatus::Connecting)
            .await?;

        let transport = Transport::for_url(&task.source_url, self.cfg.backend)
            .map_err(anyhow::Error::new)?;
        let probed = probe::probe(&transport, task.fetch_url(), &task.credentials)
            .await
            .map_err(anyhow::Error::new)?;

        probe::check_validators(task.etag.as_deref(), task.last_modified.as_deref(), &probed)
            .map_err(anyhow::Error::new)?;
        if !task.has_validators() {
            self.store
                .set_task_validators(
                    self.task_id,
                    probed.etag.as_deref(),
                    probed.last_modified.as_deref(),
                )
                .await?;
        }
        if probed.final_url != task.fetch_url() {
            self.store
                .set_task_resolved_url(self.task_id, &probed.final_url)
                .await?;
        }

        let mut total_size = task.total_size;
        if total_size == 0 {
            if let Some(n) = probed.content_length {
                total_size = n;
                self.store.set_task_total_size(self.task_id, n).await?;
            }
        }

        if self.paused() {
            return Err(anyhow::Error::new(TaskPaused));
        }

        let dest = DestFile::open(Path::new(&task.destination_path))
            .map_err(|e| anyhow::Error::new(DownloadError::Io(e)))?;
        if total_size > 0 {
            dest.set_size(total_size)
                .map_err(|e| anyhow::Error::new(DownloadError::Io(e)))?;
        }

        self.store
            .set_task_status(self.task_id, TaskStatus::Running)
            .await?;

        let connections = self.cfg.effective_connections(task.connection_count);
        let rows = self
            .ensure_segments(total_size, &probed, connections)
            .await?;
        let mut states: Vec<Arc<SegmentState>> =
            rows.iter().map(|r| Arc::new(SegmentState::from_row(r))).collect();

        let downloaded: u64 = rows.iter().map(|r| r.received()).sum();
        let downloaded = Arc::new(AtomicU64::new(downloaded));
        self.progress
            .update(self.task_id, downloaded.load(Ordering::Relaxed), total_size);

        let run = RunCtx {
            transport,
            url: probed.final_url.clone(),
            creds: task.credentials.clone(),
            dest: dest.clone(),
            downloaded,
            total_size,
            connections,
        };

        let end = self.supervise(&run, &mut states).await?;

        if let Some(err) = end.first_error {
            return Err(anyhow::Error::new(err));
        }
        if end.paused {
            return Err(anyhow::Error::new(TaskPaused));
        }

        if !states.iter().all(|s| s.is_complete()) {
            return Err(anyhow::Error::new(DownloadError::ConnectionFailed(
                "workers stopped with incomplete segments".to_string(),
            )));
        }

        dest.sync()
            .map_err(|e| anyhow::Error::new(DownloadError::Io(e)))?;
        let final_total = end.discovered_total.unwrap_or(total_size);
        if final_total > 0 {
            let on_disk = dest
                .len()
                .map_err(|e| anyhow::Error::new(DownloadError::Io(e)))?;
            if on_disk != final_total {
                return Err(anyhow::Error::new(DownloadError::Io(std::io::Error::other(
                    format!("destination is {on_disk} bytes, expected {final_total}"),
                ))));
            }
        }

        self.store
            .set_task_status(self.task_id, TaskStatus::Complete)
            .await?;
        self.progress.remove(self.task_id);
        tracing::info!(task = self.task_id, bytes = final_total, "task complete");
        Ok(())
    }

    /// Load the persisted segment plan, or create one on first run:
    /// ranged origins with known size get up to `min(connections, 4)` equal
    /// segments; everything else gets a single segment (bounded when the
    /// size is known, open-ended otherwise).
    async fn ensure_segments(
        &self,
        total_size: u64,
        probed: &ProbeResult,
        connections: usize,
    ) -> Result<Vec<SegmentRow>> {
        let existing = self.store.list_segments(self.task_id).await?;
        if !existing.is_empty() {
            return Ok(existing);
        }
        let plan: Vec<NewSegment> = if probed.accept_ranges && total_size > 0 {
            plan_initial_segments(total_size, connections)
        } else if total_size > 0 {
            vec![NewSegment {
                start_offset: 0,
                end_offset: Some(total_size - 1),
                current_offset: 0,
            }]
        } else {
            vec![NewSegment {
                start_offset: 0,
                end_offset: None,
                current_offset: 0,
            }]
        };
        self.store.replace_segments(self.task_id, &plan).await?;
        self.store.list_segments(self.task_id).await.map_err(Into::into)
    }

    fn spawn_worker(
        &self,
        join: &mut JoinSet<(usize, Result<SegmentOutcome, DownloadError>)>,
        run: &RunCtx,
        states: &[Arc<SegmentState>],
        index: usize,
        active: &mut HashSet<usize>,
    ) {
        active.insert(index);
        let ctx = WorkerCtx {
            task_id: self.task_id,
            url: run.url.clone(),
            creds: run.creds.clone(),
            transport: run.transport.clone(),
            seg: Arc::clone(&states[index]),
            dest: run.dest.clone(),
            limiter: Arc::clone(&self.limiter),
            progress: Arc::clone(&self.progress),
            downloaded: Arc::clone(&run.downloaded),
            total_size: run.total_size,
            pause: Arc::clone(&self.pause),
            retry: self.retry,
        };
        join.spawn(async move { (index, worker::run_segment(ctx).await) });
    }

    /// Fill free worker slots: unclaimed incomplete segments first, then an
    /// in-half split of the largest remaining tail.
    async fn refill(
        &self,
        join: &mut JoinSet<(usize, Result<SegmentOutcome, DownloadError>)>,
        run: &RunCtx,
        states: &mut Vec<Arc<SegmentState>>,
        active: &mut HashSet<usize>,
        checkpointer: &mut Checkpointer,
    ) -> Result<()> {
        while active.len() < run.connections {
            let unclaimed = states
                .iter()
                .enumerate()
                .filter(|(i, s)| !s.is_complete() && !active.contains(i))
                .min_by_key(|(_, s)| s.start)
                .map(|(i, _)| i);
            if let Some(index) = unclaimed {
                self.spawn_worker(join, run, states, index, active);
                continue;
            }

            let Some(split) = pick_split_target(states) else {
                break;
            };
            let target = Arc::clone(&states[split.index]);
            // Shrink the live bound first; the worker's clamped writes make
            // this safe (see worker::MAX_WRITE), then persist both halves.
            target.end.store(split.mid - 1, Ordering::Release);
            let new_id = self
                .store
                .split_segment(self.task_id, target.id, split.current, split.mid, split.old_end)
                .await?;
            let new_state = Arc::new(SegmentState {
                id: new_id,
                start: split.mid,
                current: AtomicU64::new(split.mid),
                end: AtomicU64::new(split.old_end),
                complete: AtomicBool::new(false),
            });
            states.push(new_state);
            checkpointer.force(states).await?;
            let index = states.len() - 1;
            tracing::debug!(
                task = self.task_id,
                segment = target.id,
                new_segment = new_id,
                mid = split.mid,
                "split segment tail"
            );
            self.spawn_worker(join, run, states, index, active);
        }
        Ok(())
    }

    async fn supervise(
        &self,
        run: &RunCtx,
        states: &mut Vec<Arc<SegmentState>>,
    ) -> Result<SuperviseEnd> {
        let mut join: JoinSet<(usize, Result<SegmentOutcome, DownloadError>)> = JoinSet::new();
        let mut active: HashSet<usize> = HashSet::new();
        let mut end = SuperviseEnd::default();
        let mut checkpointer = Checkpointer::new(
            self.store.clone(),
            Duration::from_secs(self.cfg.persistence_interval_secs.max(1)),
        );

        let mut initial: Vec<usize> = states
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.is_complete())
            .map(|(i, _)| i)
            .collect();
        initial.sort_by_key(|&i| states[i].start);
        for index in initial.into_iter().take(run.connections) {
            self.spawn_worker(&mut join, run, states, index, &mut active);
        }

        let mut tick = tokio::time::interval(checkpoint::MIN_SAVE_SPACING);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        while !join.is_empty() {
            tokio::select! {
                _ = tick.tick() => {
                    checkpointer.tick(states).await?;
                }
                joined = join.join_next() => {
                    let Some(result) = joined else { continue };
                    let (index, outcome) = result.context("segment worker panicked")?;
                    active.remove(&index);
                    match outcome {
                        Ok(SegmentOutcome::Complete) => {
                            checkpointer.force(states).await?;
                            if end.first_error.is_none() && !end.paused && !self.paused() {
                                self.refill(&mut join, run, states, &mut active, &mut checkpointer)
                                    .await?;
                            }
                        }
                        Ok(SegmentOutcome::CompleteUnbounded { discovered }) => {
                            let state = Arc::clone(&states[index]);
                            if discovered > 0 {
                                state.end.store(discovered - 1, Ordering::Release);
                                self.store.set_segment_end(state.id, discovered - 1).await?;
                            } else {
                                // Empty body: pin [0,0] consumed so the row reads complete.
                                state.end.store(0, Ordering::Release);
                                state.current.store(1, Ordering::Release);
                                self.store.set_segment_end(state.id, 0).await?;
                            }
                            self.store.set_task_total_size(self.task_id, discovered).await?;
                            end.discovered_total = Some(discovered);
                            checkpointer.force(states).await?;
                        }
                        Ok(SegmentOutcome::Paused) => {
                            end.paused = true;
                            checkpointer.force(states).await?;
                        }
                        Err(e) => {
                            tracing::warn!(
                                task = self.task_id,
                                segment = states[index].id,
                                "segment failed: {}",
                                e
                            );
                            if end.first_error.is_none() {
                                end.first_error = Some(e);
                            }
                            checkpointer.force(states).await?;
                        }
                    }
                }
            }
        }

        checkpointer.force(states).await?;
        end.paused = end.paused || self.paused();
        Ok(end)
    }
}

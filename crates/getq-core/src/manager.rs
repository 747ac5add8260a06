//! Application root: owns the store, limiter, progress table, and registry,
//! and exposes the ingest/control surface (`add_download`, start, pause,
//! resume, cancel, delete). Singleton by construction, not by global state:
//! build one and pass it around by `Arc`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::GetqConfig;
use crate::control::TaskRegistry;
use crate::limiter::RateLimiter;
use crate::naming;
use crate::probe;
use crate::progress::ProgressBroadcaster;
use crate::queue::{QueueManager, TaskEvent};
use crate::store::{Credentials, NewTask, QueueId, Store, TaskId, TaskStatus};
use crate::transport::Transport;

/// Options recognized by `add_download`.
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    /// Per-task connection override, clamped to 1..=32.
    pub connection_count: Option<usize>,
    /// Target queue; None routes to the default queue.
    pub queue_id: Option<QueueId>,
    /// Create the task paused instead of pending.
    pub start_paused: bool,
    /// Explicit filename; skips the naming probe entirely.
    pub suggested_filename: Option<String>,
    pub cookies: Option<String>,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
    /// Higher runs earlier.
    pub priority: i64,
}

/// The process-wide download manager.
pub struct DownloadManager {
    store: Store,
    cfg: GetqConfig,
    limiter: Arc<RateLimiter>,
    progress: Arc<ProgressBroadcaster>,
    registry: Arc<TaskRegistry>,
    events: mpsc::Sender<TaskEvent>,
}

impl DownloadManager {
    /// Build the manager and its scheduler. The caller spawns
    /// `QueueManager::run` on its executor; everything else talks to the
    /// returned manager.
    pub fn new(store: Store, cfg: GetqConfig) -> (Arc<Self>, QueueManager) {
        let limiter = Arc::new(RateLimiter::new(cfg.rate_limit_bytes_per_sec));
        let progress = Arc::new(ProgressBroadcaster::new());
        let registry = Arc::new(TaskRegistry::new());
        let scheduler = QueueManager::new(
            store.clone(),
            cfg.clone(),
            Arc::clone(&limiter),
            Arc::clone(&progress),
            Arc::clone(&registry),
        );
        let manager = Arc::new(DownloadManager {
            store,
            cfg,
            limiter,
            progress,
            registry,
            events: scheduler.sender(),
        });
        (manager, scheduler)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn progress(&self) -> &Arc<ProgressBroadcaster> {
        &self.progress
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Create a task for `url`, derive its destination filename, and hand it
    /// to the scheduler. Malformed or non-HTTP(S) URLs are rejected with
    /// `InvalidUrl` and no task is created.
    pub async fn add_download(
        &self,
        url: &str,
        destination_directory: &Path,
        options: AddOptions,
    ) -> Result<TaskId> {
        // Validates scheme and syntax up front.
        let transport =
            Transport::for_url(url, self.cfg.backend).map_err(anyhow::Error::new)?;

        let credentials = Credentials {
            cookies: options.cookies.clone(),
            referrer: options.referrer.clone(),
            user_agent: options.user_agent.clone(),
        };

        // Without an explicit name, probe for Content-Disposition and the
        // post-redirect URL. Best effort: a failed probe falls back to the
        // URL itself, and the start-time probe remains authoritative.
        let mut probed = None;
        if options.suggested_filename.is_none() {
            match probe::probe(&transport, url, &credentials).await {
                Ok(p) => probed = Some(p),
                Err(e) => {
                    tracing::debug!(url, "ingest probe failed, naming from URL: {}", e)
                }
            }
        }

        let final_url = probed.as_ref().map(|p| p.final_url.as_str()).unwrap_or(url);
        let filename = naming::derive_filename(
            options.suggested_filename.as_deref(),
            probed.as_ref().and_then(|p| p.content_disposition.as_deref()),
            final_url,
            probed.as_ref().and_then(|p| p.content_type.as_deref()),
        );
        let destination_path = destination_directory.join(&filename);
        if destination_path.exists() {
            tracing::warn!(
                path = %destination_path.display(),
                "destination already exists; it will be overwritten"
            );
        }

        let queue_id = match options.queue_id {
            Some(id) => {
                self.store
                    .get_queue(id)
                    .await?
                    .with_context(|| format!("queue {id} does not exist"))?;
                id
            }
            None => self.store.ensure_default_queue().await?.id,
        };

        let status = if options.start_paused {
            TaskStatus::Paused
        } else {
            TaskStatus::Pending
        };
        let task_id = self
            .store
            .insert_task(&NewTask {
                source_url: url.to_string(),
                destination_path: destination_path.display().to_string(),
                status,
                credentials,
                connection_count: options.connection_count.map(|n| n.clamp(1, 32)),
                priority: options.priority,
                queue_id: Some(queue_id),
            })
            .await?;

        if let Some(p) = probed {
            if p.final_url != url {
                self.store.set_task_resolved_url(task_id, &p.final_url).await?;
            }
            self.store
                .set_task_validators(task_id, p.etag.as_deref(), p.last_modified.as_deref())
                .await?;
            if let Some(n) = p.content_length {
                self.store.set_task_total_size(task_id, n).await?;
            }
        }

        tracing::info!(task = task_id, url, file = %filename, "added download");
        let _ = self.events.send(TaskEvent::Added(task_id)).await;
        Ok(task_id)
    }

    /// Make a task eligible for scheduling. No-op for `complete` tasks and
    /// for tasks that are already live.
    pub async fn start(&self, task_id: TaskId) -> Result<()> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .with_context(|| format!("task {task_id} not found"))?;
        if task.status == TaskStatus::Complete || self.registry.is_running(task_id) {
            return Ok(());
        }
        self.store.set_task_status(task_id, TaskStatus::Pending).await?;
        let _ = self.events.send(TaskEvent::Added(task_id)).await;
        Ok(())
    }

    /// Resume is a fresh start; validators must still match at probe time.
    pub async fn resume(&self, task_id: TaskId) -> Result<()> {
        self.start(task_id).await
    }

    /// Cooperative pause. A live coordinator persists offsets and flips the
    /// task to `paused`; a queued task is paused directly in the store.
    pub async fn pause(&self, task_id: TaskId) -> Result<()> {
        if self.registry.request_pause(task_id) {
            return Ok(());
        }
        let task = self
            .store
            .get_task(task_id)
            .await?
            .with_context(|| format!("task {task_id} not found"))?;
        if task.status == TaskStatus::Pending {
            self.store.set_task_status(task_id, TaskStatus::Paused).await?;
        }
        Ok(())
    }

    /// Stop a task without removing it. The destination file is retained.
    pub async fn cancel(&self, task_id: TaskId) -> Result<()> {
        self.pause(task_id).await
    }

    /// Remove a task (and optionally its destination file). A live download
    /// is paused first; its coordinator stops at the next chunk boundary.
    pub async fn delete(&self, task_id: TaskId, remove_file: bool) -> Result<()> {
        let task = self.store.get_task(task_id).await?;
        self.pause(task_id).await.ok();
        self.progress.remove(task_id);
        self.store.delete_task(task_id).await?;
        if remove_file {
            if let Some(task) = task {
                let path = PathBuf::from(&task.destination_path);
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(path = %path.display(), "could not remove file: {}", e);
                    }
                }
            }
        }
        Ok(())
    }

    /// Reset interrupted tasks after a restart and wake the scheduler.
    pub async fn recover(&self) -> Result<u64> {
        let n = self.store.recover_interrupted().await?;
        if n > 0 {
            tracing::info!("recovered {} task(s) from previous run", n);
        }
        Ok(n)
    }
}

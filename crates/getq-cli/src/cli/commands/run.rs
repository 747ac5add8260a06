//! `getq run` – the download daemon.
//!
//! Recovers interrupted tasks, runs the queue scheduler, listens on the
//! control socket, and sweeps the browser-extension pending-requests
//! directory. Ctrl-C pauses live downloads (persisting their offsets) and
//! exits.

use anyhow::Result;
use getq_core::config::GetqConfig;
use getq_core::control;
use getq_core::ingest;
use getq_core::manager::DownloadManager;
use getq_core::queue::QueueManager;
use std::sync::Arc;
use std::time::Duration;

use crate::cli::control_socket;

pub async fn run_daemon(
    manager: Arc<DownloadManager>,
    scheduler: QueueManager,
    cfg: &GetqConfig,
) -> Result<()> {
    manager.recover().await?;
    manager.store().ensure_default_queue().await?;

    if let Ok(socket_path) = control::default_control_socket_path() {
        if control_socket::spawn_control_listener(Arc::clone(&manager), &socket_path).is_ok() {
            tracing::debug!(path = %socket_path.display(), "control socket listening");
        }
    }

    let pending_dir = cfg.pending_dir()?;
    tokio::spawn(ingest::run_poller(
        Arc::clone(&manager),
        pending_dir.clone(),
        cfg.download_dir(),
        Duration::from_secs(cfg.pending_poll_interval_secs.max(1)),
    ));
    tracing::info!(dir = %pending_dir.display(), "watching pending requests");

    let scheduler_handle = tokio::spawn(scheduler.run());

    // Periodic one-line progress report for anyone watching the terminal.
    let progress_manager = Arc::clone(&manager);
    let progress_handle = tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(2));
        loop {
            tick.tick().await;
            let rows = progress_manager.progress().snapshot();
            for (task_id, p) in rows {
                let pct = p.fraction() * 100.0;
                let rate_mib = p.bytes_per_second / 1_048_576.0;
                println!(
                    "task {}: {:.1} / {:.1} MiB ({:.1}%)  {:.2} MiB/s",
                    task_id,
                    p.downloaded_bytes as f64 / 1_048_576.0,
                    p.total_bytes as f64 / 1_048_576.0,
                    pct,
                    rate_mib
                );
            }
        }
    });

    println!("getq daemon running; Ctrl-C to stop.");
    tokio::signal::ctrl_c().await?;
    println!("\nShutting down: pausing live downloads...");
    progress_handle.abort();
    scheduler_handle.abort();

    // Cooperative pause for everything still live, then wait for the
    // coordinators to persist and settle.
    for task in manager.store().list_tasks().await? {
        if task.status.is_active() {
            let _ = manager.pause(task.id).await;
        }
    }
    for _ in 0..40 {
        let any_live = manager
            .store()
            .list_tasks()
            .await?
            .iter()
            .any(|t| t.status.is_active());
        if !any_live {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    println!("Done.");
    Ok(())
}

//! `getq status` – tasks and queues at a glance.

use anyhow::Result;
use getq_core::manager::DownloadManager;
use getq_core::store::TaskStatus;

fn human_bytes(n: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{n} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

pub async fn run_status(manager: &DownloadManager) -> Result<()> {
    let store = manager.store();
    let queues = store.list_queues().await?;
    if queues.is_empty() {
        println!("No queues yet; add a download first.");
        return Ok(());
    }

    for queue in queues {
        let state = if queue.is_active { "active" } else { "inactive" };
        println!(
            "queue {} \"{}\" [{}] max_concurrent={} mode={}",
            queue.id,
            queue.name,
            state,
            queue.max_concurrent,
            queue.mode.as_str()
        );
        let tasks = store.list_tasks_in_queue(queue.id).await?;
        if tasks.is_empty() {
            println!("  (empty)");
            continue;
        }
        for task in tasks {
            let downloaded: u64 = store
                .list_segments(task.id)
                .await?
                .iter()
                .map(|s| s.received())
                .sum();
            let progress = if task.status == TaskStatus::Complete {
                human_bytes(task.total_size)
            } else if task.total_size > 0 {
                format!(
                    "{} / {} ({:.1}%)",
                    human_bytes(downloaded),
                    human_bytes(task.total_size),
                    downloaded as f64 / task.total_size as f64 * 100.0
                )
            } else if downloaded > 0 {
                format!("{} / ?", human_bytes(downloaded))
            } else {
                "-".to_string()
            };
            println!(
                "  [{}] {:<10} {}  {}",
                task.id,
                task.status.as_str(),
                progress,
                task.destination_path
            );
            if let Some(err) = &task.error_message {
                println!("       error: {err}");
            }
        }
    }
    Ok(())
}

//! `getq resume <id>` – make a paused or failed task pending again.

use anyhow::Result;
use getq_core::manager::DownloadManager;

pub async fn run_resume(manager: &DownloadManager, id: i64) -> Result<()> {
    manager.resume(id).await?;
    println!("Task {id} is pending; a running daemon will pick it up.");
    Ok(())
}

//! `getq remove <id>` – delete a task, optionally with its file.

use anyhow::Result;
use getq_core::manager::DownloadManager;

pub async fn run_remove(manager: &DownloadManager, id: i64, delete_file: bool) -> Result<()> {
    manager.delete(id, delete_file).await?;
    if delete_file {
        println!("Removed task {id} and its destination file.");
    } else {
        println!("Removed task {id}; the downloaded file was kept.");
    }
    Ok(())
}

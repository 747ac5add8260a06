//! `getq pause <id>` – pause a task, in-daemon when one is running.

use anyhow::Result;
use getq_core::control;
use getq_core::manager::DownloadManager;

use crate::cli::control_socket;

pub async fn run_pause(manager: &DownloadManager, id: i64) -> Result<()> {
    let signalled = match control::default_control_socket_path() {
        Ok(path) => control_socket::send_pause(&path, id).await.unwrap_or(false),
        Err(_) => false,
    };
    // Queued tasks (or a stopped daemon) are paused directly in the store.
    manager.pause(id).await?;
    if signalled {
        println!("Paused task {id} (signalled running daemon).");
    } else {
        println!("Paused task {id}.");
    }
    Ok(())
}

//! Control socket: server (during `getq run`) and client (for `getq pause`).
//! Protocol: one line per command: "pause <id>" or "cancel <id>".

use anyhow::Result;
use getq_core::manager::DownloadManager;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UnixListener;

/// Spawns a task that listens on `path` and forwards each "pause <id>" or
/// "cancel <id>" line to the manager. Ignores malformed lines.
pub fn spawn_control_listener(
    manager: Arc<DownloadManager>,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    let handle = tokio::spawn(async move {
        let _ = std::fs::remove_file(&path);
        let listener = match UnixListener::bind(&path) {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(path = %path.display(), "control socket bind: {}", e);
                return;
            }
        };
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let manager = Arc::clone(&manager);
                    tokio::spawn(async move {
                        let mut reader = BufReader::new(stream).lines();
                        while let Ok(Some(line)) = reader.next_line().await {
                            let line = line.trim();
                            let id = line
                                .strip_prefix("pause ")
                                .or_else(|| line.strip_prefix("cancel "))
                                .and_then(|rest| rest.trim().parse::<i64>().ok());
                            if let Some(id) = id {
                                if let Err(e) = manager.pause(id).await {
                                    tracing::debug!(task = id, "socket pause: {:#}", e);
                                }
                            }
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

/// Sends "pause <task_id>\n" to the control socket. No-op if the socket
/// path does not exist (no daemon running).
pub async fn send_pause(socket_path: &Path, task_id: i64) -> Result<bool> {
    if !socket_path.exists() {
        return Ok(false);
    }
    let mut stream = tokio::net::UnixStream::connect(socket_path).await?;
    let msg = format!("pause {}\n", task_id);
    tokio::io::AsyncWriteExt::write_all(&mut stream, msg.as_bytes()).await?;
    Ok(true)
}

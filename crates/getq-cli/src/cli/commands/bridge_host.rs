//! `getq bridge-host` – browser native messaging host.
//!
//! Frame format (both directions): 4-byte little-endian length, then that
//! many bytes of UTF-8 JSON. Requests use the pending-request shape;
//! responses are `{"success": bool, "message": string}`. EOF on stdin ends
//! the session cleanly.

use anyhow::{Context, Result};
use getq_core::config::GetqConfig;
use getq_core::ingest::PendingRequest;
use getq_core::manager::DownloadManager;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Browsers cap native messaging frames at 1 MiB toward the host.
const MAX_FRAME: usize = 1024 * 1024;

async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("read frame length"),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME {
        anyhow::bail!("frame of {len} bytes exceeds the {MAX_FRAME} byte limit");
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.context("read frame body")?;
    Ok(Some(body))
}

async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, body: &[u8]) -> Result<()> {
    writer.write_all(&(body.len() as u32).to_le_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

async fn handle_request(
    manager: &DownloadManager,
    cfg: &GetqConfig,
    body: &[u8],
) -> (bool, String) {
    let request: PendingRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => return (false, format!("malformed request: {e}")),
    };
    let url = request.url.clone();
    match manager
        .add_download(&url, &cfg.download_dir(), request.into_options())
        .await
    {
        Ok(task_id) => (true, format!("queued as task {task_id}")),
        Err(e) => (false, format!("{e:#}")),
    }
}

pub async fn run_bridge_host(manager: &DownloadManager, cfg: &GetqConfig) -> Result<()> {
    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();

    while let Some(body) = read_frame(&mut stdin).await? {
        let (success, message) = handle_request(manager, cfg, &body).await;
        let response = json!({ "success": success, "message": message });
        write_frame(&mut stdout, response.to_string().as_bytes()).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_roundtrip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, br#"{"success":true,"message":"ok"}"#)
            .await
            .unwrap();
        assert_eq!(&buf[..4], &31u32.to_le_bytes());

        let mut cursor = std::io::Cursor::new(buf);
        let body = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(body, br#"{"success":true,"message":"ok"}"#);
        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_frame_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(2u32 * 1024 * 1024).to_le_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        assert!(read_frame(&mut cursor).await.is_err());
    }
}

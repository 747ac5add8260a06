//! External ingest: the pending-requests directory bridge.
//!
//! Browser extensions (via the native messaging host or directly) drop one
//! JSON file per download request into a well-known directory. The daemon
//! polls it, consumes each file delete-on-read, and feeds `add_download`.
//! Malformed files are removed and logged, never retried.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::manager::{AddOptions, DownloadManager};

/// One external download request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingRequest {
    pub url: String,
    /// "k=v; k2=v2" cookie concatenation, replayed verbatim.
    #[serde(default)]
    pub cookies: Option<String>,
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default, rename = "userAgent")]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

impl PendingRequest {
    pub fn into_options(self) -> AddOptions {
        AddOptions {
            suggested_filename: self.filename,
            cookies: self.cookies,
            referrer: self.referrer,
            user_agent: self.user_agent,
            ..AddOptions::default()
        }
    }
}

/// Consume every `.json` file in `dir`: parse, delete, submit. Returns the
/// number of downloads added. Files that fail to parse or submit are still
/// deleted so a poison file cannot wedge the bridge.
pub async fn consume_pending_dir(
    manager: &DownloadManager,
    dir: &Path,
    download_dir: &Path,
) -> Result<usize> {
    let mut added = 0usize;
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e).with_context(|| format!("read {}", dir.display())),
    };

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let data = tokio::fs::read(&path).await;
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!(path = %path.display(), "could not delete pending request: {}", e);
        }
        let data = match data {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(path = %path.display(), "could not read pending request: {}", e);
                continue;
            }
        };
        let request: PendingRequest = match serde_json::from_slice(&data) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(path = %path.display(), "malformed pending request: {}", e);
                continue;
            }
        };
        let url = request.url.clone();
        match manager
            .add_download(&url, download_dir, request.into_options())
            .await
        {
            Ok(task_id) => {
                tracing::info!(task = task_id, url, "accepted bridge request");
                added += 1;
            }
            Err(e) => tracing::warn!(url, "bridge request rejected: {:#}", e),
        }
    }
    Ok(added)
}

/// Poll the pending-requests directory until the task is aborted.
pub async fn run_poller(
    manager: Arc<DownloadManager>,
    dir: std::path::PathBuf,
    download_dir: std::path::PathBuf,
    interval: Duration,
) {
    if let Err(e) = tokio::fs::create_dir_all(&dir).await {
        tracing::warn!(dir = %dir.display(), "cannot create pending dir: {}", e);
    }
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(100)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if let Err(e) = consume_pending_dir(&manager, &dir, &download_dir).await {
            tracing::warn!("pending request sweep failed: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_json_shape_roundtrips() {
        let json = r#"{
            "url": "https://example.com/f.zip",
            "cookies": "a=1; b=2",
            "referrer": "https://example.com/",
            "userAgent": "Mozilla/5.0",
            "filename": "f.zip"
        }"#;
        let req: PendingRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.url, "https://example.com/f.zip");
        assert_eq!(req.cookies.as_deref(), Some("a=1; b=2"));
        assert_eq!(req.user_agent.as_deref(), Some("Mozilla/5.0"));

        let opts = req.into_options();
        assert_eq!(opts.suggested_filename.as_deref(), Some("f.zip"));
        assert_eq!(opts.cookies.as_deref(), Some("a=1; b=2"));
    }

    #[test]
    fn nulls_and_missing_fields_accepted() {
        let req: PendingRequest =
            serde_json::from_str(r#"{"url": "https://example.com/f", "cookies": null}"#).unwrap();
        assert_eq!(req.cookies, None);
        assert_eq!(req.filename, None);
    }
}

//! `getq add <url>` – add a new download task.

use anyhow::Result;
use getq_core::manager::{AddOptions, DownloadManager};
use std::path::Path;

pub async fn run_add(
    manager: &DownloadManager,
    url: &str,
    dir: &Path,
    options: AddOptions,
) -> Result<()> {
    let id = manager.add_download(url, dir, options).await?;
    println!("Added task {id} for URL: {url}");
    println!("Run `getq run` to start downloading, or `getq status` to inspect.");
    Ok(())
}

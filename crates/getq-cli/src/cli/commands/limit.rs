//! `getq limit <bytes/s>` – persist the global rate cap.

use anyhow::Result;
use getq_core::config;
use getq_core::manager::DownloadManager;

pub fn run_limit(manager: &DownloadManager, bytes_per_sec: u64) -> Result<()> {
    let mut cfg = config::load_or_init()?;
    cfg.rate_limit_bytes_per_sec = bytes_per_sec;
    config::save(&cfg)?;
    manager.limiter().configure(bytes_per_sec);
    if bytes_per_sec == 0 {
        println!("Rate limiting disabled.");
    } else {
        println!("Rate limit set to {bytes_per_sec} bytes/s (burst {} bytes).", bytes_per_sec * 2);
    }
    println!("A running daemon applies the new limit after restart.");
    Ok(())
}

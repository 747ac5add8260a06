//! Logging: daily-rotated files under the XDG state dir.
//!
//! The filter comes from `RUST_LOG` when set, else from the config's
//! `log_filter`, else a built-in default. File writes go through a
//! non-blocking appender so a slow disk never stalls a transfer; the flush
//! guard lives for the whole process.

use anyhow::Result;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

static FLUSH_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const DEFAULT_FILTER: &str = "info,getq=debug";

fn resolve_filter(configured: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if configured.is_empty() {
            EnvFilter::new(DEFAULT_FILTER)
        } else {
            EnvFilter::new(configured)
        }
    })
}

/// Initialize logging to daily files at `~/.local/state/getq/logs/getq.log.*`.
/// `configured_filter` is the config's `log_filter` value; `RUST_LOG` wins
/// over it. On failure (state dir unwritable) returns Err so the caller can
/// fall back to stderr.
pub fn init_logging(configured_filter: &str) -> Result<()> {
    let logs_dir = xdg::BaseDirectories::with_prefix("getq")?
        .get_state_home()
        .join("logs");
    std::fs::create_dir_all(&logs_dir)?;

    let appender = tracing_appender::rolling::daily(&logs_dir, "getq.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = FLUSH_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(resolve_filter(configured_filter))
        .with_writer(writer)
        .with_ansi(false)
        .init();

    tracing::info!("logging to {}", logs_dir.display());
    Ok(())
}

/// Stderr-only fallback when the state dir is unusable. Never stdout: the
/// bridge host owns that stream.
pub fn init_logging_stderr(configured_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(resolve_filter(configured_filter))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

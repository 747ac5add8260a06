use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Which transfer backend to use for http/https URLs.
///
/// `Http` is the streaming reqwest client; `Curl` is the blocking libcurl
/// fallback for environments where the native TLS stack misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Http,
    Curl,
}

/// Global configuration loaded from `~/.config/getq/config.toml`.
/// Missing keys fall back to defaults so older config files keep parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GetqConfig {
    /// Default connections per task when the task carries no override (1..=32).
    pub connection_count: usize,
    /// Aggregate download rate cap in bytes per second. 0 disables limiting.
    pub rate_limit_bytes_per_sec: u64,
    /// Outer bound between progress checkpoints, in seconds.
    pub persistence_interval_secs: u64,
    /// Queue scheduling tick in milliseconds (event-triggered passes run sooner).
    pub scheduler_tick_ms: u64,
    /// Directory watched for browser-extension pending request files.
    /// Empty string means the XDG default (`~/.local/state/getq/pending`).
    pub pending_requests_dir: String,
    /// Poll interval for the pending-requests directory, in seconds.
    pub pending_poll_interval_secs: u64,
    /// Transfer backend for http/https URLs.
    pub backend: Backend,
    /// Where downloads land when the caller gives no directory.
    /// Empty string means `~/Downloads` (falling back to the working dir).
    pub download_dir: String,
    /// Tracing filter used when `RUST_LOG` is unset (e.g. "info,getq=trace").
    /// Empty string selects the built-in default.
    pub log_filter: String,
}

impl Default for GetqConfig {
    fn default() -> Self {
        Self {
            connection_count: 4,
            rate_limit_bytes_per_sec: 0,
            persistence_interval_secs: 1,
            scheduler_tick_ms: 1000,
            pending_requests_dir: String::new(),
            pending_poll_interval_secs: 1,
            backend: Backend::Http,
            download_dir: String::new(),
            log_filter: String::new(),
        }
    }
}

impl GetqConfig {
    /// Connection count clamped to the supported range, applying the
    /// per-task override when present.
    pub fn effective_connections(&self, task_override: Option<usize>) -> usize {
        task_override.unwrap_or(self.connection_count).clamp(1, 32)
    }

    /// Resolved default download directory.
    pub fn download_dir(&self) -> PathBuf {
        if !self.download_dir.is_empty() {
            return PathBuf::from(&self.download_dir);
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Downloads");
        }
        PathBuf::from(".")
    }

    /// Resolved pending-requests directory (config value or XDG default).
    pub fn pending_dir(&self) -> Result<PathBuf> {
        if !self.pending_requests_dir.is_empty() {
            return Ok(PathBuf::from(&self.pending_requests_dir));
        }
        let xdg_dirs = xdg::BaseDirectories::with_prefix("getq")?;
        Ok(xdg_dirs.get_state_home().join("pending"))
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("getq")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<GetqConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = GetqConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: GetqConfig = toml::from_str(&data)?;
    Ok(cfg)
}

/// Persist the given configuration, overwriting the existing file.
pub fn save(cfg: &GetqConfig) -> Result<()> {
    let path = config_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, toml::to_string_pretty(cfg)?)?;
    Ok(())
}

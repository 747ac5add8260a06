//! CLI for the getq download manager.

mod commands;
mod control_socket;

use anyhow::Result;
use clap::{Parser, Subcommand};
use getq_core::config;
use getq_core::logging;
use getq_core::manager::{AddOptions, DownloadManager};
use getq_core::store::{QueueMode, Store};
use std::path::PathBuf;

use commands::{
    run_add, run_bridge_host, run_checksum, run_daemon, run_limit, run_pause, run_queue,
    run_remove, run_resume, run_status, QueueCommand,
};

/// Top-level CLI for the getq download manager.
#[derive(Debug, Parser)]
#[command(name = "getq")]
#[command(about = "getq: queued multi-connection download manager", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Add a new download task.
    Add {
        /// Direct HTTP/HTTPS URL to download.
        url: String,
        /// Directory where the file will be saved (default: the configured
        /// download directory).
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
        /// Connections for this task (1..=32; default from config).
        #[arg(long, value_name = "N")]
        connections: Option<usize>,
        /// Queue id the task belongs to (default: the Default queue).
        #[arg(long)]
        queue: Option<i64>,
        /// Create the task paused; it will not start until resumed.
        #[arg(long)]
        paused: bool,
        /// Explicit destination filename (skips server-derived naming).
        #[arg(long, value_name = "NAME")]
        filename: Option<String>,
        /// Scheduling priority; higher runs earlier.
        #[arg(long, default_value = "0")]
        priority: i64,
    },

    /// Run the download daemon: scheduler, control socket, and the
    /// browser-extension pending-requests bridge. Ctrl-C stops it.
    Run,

    /// Show status of all tasks and queues.
    Status,

    /// Pause a task. Reaches a running daemon through the control socket;
    /// queued tasks are paused directly.
    Pause {
        /// Task identifier.
        id: i64,
    },

    /// Resume a paused or failed task (a fresh start; validators must still match).
    Resume {
        /// Task identifier.
        id: i64,
    },

    /// Cancel a task: stop it but keep the task and the partial file.
    Cancel {
        /// Task identifier.
        id: i64,
    },

    /// Remove a task. With --delete-file, also deletes the destination file.
    Remove {
        /// Task identifier.
        id: i64,
        /// Also delete the downloaded (possibly partial) file.
        #[arg(long)]
        delete_file: bool,
    },

    /// Manage queues.
    Queue {
        #[command(subcommand)]
        command: QueueCommand,
    },

    /// Set the global download rate limit in bytes per second (0 disables).
    /// Stored in the config; a running daemon picks it up on restart.
    Limit {
        bytes_per_sec: u64,
    },

    /// Compute SHA-256 of a file (e.g. after download).
    Checksum {
        /// Path to the file.
        path: PathBuf,
    },

    /// Native messaging host: length-prefixed JSON frames on stdio.
    /// Invoked by the browser, not interactively.
    #[command(name = "bridge-host")]
    BridgeHost,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        if logging::init_logging(&cfg.log_filter).is_err() {
            logging::init_logging_stderr(&cfg.log_filter);
        }
        tracing::debug!("loaded config: {:?}", cfg);
        let store = Store::open_default().await?;
        let (manager, scheduler) = DownloadManager::new(store, cfg.clone());

        match cli.command {
            CliCommand::Add {
                url,
                dir,
                connections,
                queue,
                paused,
                filename,
                priority,
            } => {
                let dir = dir.unwrap_or_else(|| cfg.download_dir());
                let options = AddOptions {
                    connection_count: connections,
                    queue_id: queue,
                    start_paused: paused,
                    suggested_filename: filename,
                    priority,
                    ..AddOptions::default()
                };
                run_add(&manager, &url, &dir, options).await?;
            }
            CliCommand::Run => run_daemon(manager, scheduler, &cfg).await?,
            CliCommand::Status => run_status(&manager).await?,
            CliCommand::Pause { id } => run_pause(&manager, id).await?,
            CliCommand::Resume { id } => run_resume(&manager, id).await?,
            CliCommand::Cancel { id } => run_pause(&manager, id).await?,
            CliCommand::Remove { id, delete_file } => {
                run_remove(&manager, id, delete_file).await?
            }
            CliCommand::Queue { command } => run_queue(&manager, command).await?,
            CliCommand::Limit { bytes_per_sec } => run_limit(&manager, bytes_per_sec)?,
            CliCommand::Checksum { path } => run_checksum(&path)?,
            CliCommand::BridgeHost => run_bridge_host(&manager, &cfg).await?,
        }

        Ok(())
    }
}

pub(crate) fn parse_queue_mode(sequential: bool) -> QueueMode {
    if sequential {
        QueueMode::Sequential
    } else {
        QueueMode::Parallel
    }
}

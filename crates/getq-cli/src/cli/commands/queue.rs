//! `getq queue ...` – create and tune scheduling queues.

use anyhow::Result;
use clap::Subcommand;
use getq_core::manager::DownloadManager;
use getq_core::store::QueueMode;

use crate::cli::parse_queue_mode;

#[derive(Debug, Subcommand)]
pub enum QueueCommand {
    /// Create a new queue.
    Add {
        name: String,
        /// Tasks allowed to run at once in this queue.
        #[arg(long, default_value = "3", value_name = "N")]
        max_concurrent: usize,
        /// Run tasks one at a time regardless of max-concurrent.
        #[arg(long)]
        sequential: bool,
    },
    /// List queues.
    List,
    /// Change a queue's settings.
    Set {
        id: i64,
        #[arg(long, value_name = "N")]
        max_concurrent: Option<usize>,
        /// "parallel" or "sequential".
        #[arg(long, value_name = "MODE")]
        mode: Option<String>,
        /// Activate or deactivate the queue ("true"/"false").
        #[arg(long, value_name = "BOOL")]
        active: Option<bool>,
    },
    /// Remove a queue. Fails while it still owns unfinished tasks.
    Remove { id: i64 },
}

pub async fn run_queue(manager: &DownloadManager, command: QueueCommand) -> Result<()> {
    let store = manager.store();
    match command {
        QueueCommand::Add {
            name,
            max_concurrent,
            sequential,
        } => {
            let id = store
                .insert_queue(&name, max_concurrent, parse_queue_mode(sequential))
                .await?;
            println!("Created queue {id} \"{name}\".");
        }
        QueueCommand::List => {
            for q in store.list_queues().await? {
                let state = if q.is_active { "active" } else { "inactive" };
                println!(
                    "{}  {:<16} [{}] max_concurrent={} mode={}",
                    q.id,
                    q.name,
                    state,
                    q.max_concurrent,
                    q.mode.as_str()
                );
            }
        }
        QueueCommand::Set {
            id,
            max_concurrent,
            mode,
            active,
        } => {
            if let Some(n) = max_concurrent {
                store.set_queue_max_concurrent(id, n).await?;
            }
            if let Some(mode) = mode {
                let mode = match mode.as_str() {
                    "sequential" => QueueMode::Sequential,
                    "parallel" => QueueMode::Parallel,
                    other => anyhow::bail!("unknown mode '{other}' (parallel|sequential)"),
                };
                store.set_queue_mode(id, mode).await?;
            }
            if let Some(active) = active {
                store.set_queue_active(id, active).await?;
            }
            println!("Updated queue {id}.");
        }
        QueueCommand::Remove { id } => {
            store.delete_queue(id).await?;
            println!("Removed queue {id}.");
        }
    }
    Ok(())
}

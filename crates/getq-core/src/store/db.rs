//! SQLite-backed store: open, migrate, shared helpers.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Handle to the SQLite-backed task store.
///
/// The database file lives under the XDG state directory:
/// `~/.local/state/getq/tasks.db`.
#[derive(Clone)]
pub struct Store {
    pub(crate) pool: Pool<Sqlite>,
}

impl Store {
    /// Open (or create) the default store and run migrations.
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("getq")?;
        let state_dir = xdg_dirs.get_state_home();
        tokio::fs::create_dir_all(&state_dir).await?;
        Self::open_at(&state_dir.join("tasks.db")).await
    }

    /// Open (or create) a store at an explicit path. Used by tests and tools.
    pub async fn open_at(db_path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let store = Store { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        // Three tables mirroring the persistent entities: queues own tasks,
        // tasks own segments. Segment progress is byte-precise
        // (`current_offset`), which is what makes crash replay idempotent.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queues (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                is_active INTEGER NOT NULL DEFAULT 1,
                max_concurrent INTEGER NOT NULL DEFAULT 3,
                mode TEXT NOT NULL DEFAULT 'parallel'
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_url TEXT NOT NULL,
                resolved_url TEXT,
                destination_path TEXT NOT NULL,
                total_size INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                etag TEXT,
                last_modified TEXT,
                cookies TEXT,
                referrer TEXT,
                user_agent TEXT,
                connection_count INTEGER,
                priority INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                queue_id INTEGER REFERENCES queues(id),
                error_message TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS segments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                start_offset INTEGER NOT NULL,
                end_offset INTEGER,
                current_offset INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_queue ON tasks(queue_id);")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_segments_task ON segments(task_id);")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// Creation timestamps are milliseconds so FIFO tie-breaks stay meaningful
/// for tasks added in one burst.
pub(crate) fn timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Open an in-memory store for unit tests (no disk I/O).
    /// Single connection so the pool never hands back a different empty DB.
    pub async fn open_memory() -> Result<Store> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Store { pool };
        store.migrate().await?;
        Ok(store)
    }
}

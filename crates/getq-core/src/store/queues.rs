//! Queue read/write operations and the built-in default queue.

use anyhow::{bail, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::db::Store;
use super::types::{QueueId, QueueMode, QueueRow};

/// Name of the queue tasks land in when no queue is specified.
pub const DEFAULT_QUEUE_NAME: &str = "Default";

fn row_to_queue(row: &SqliteRow) -> QueueRow {
    let is_active: i64 = row.get("is_active");
    let max_concurrent: i64 = row.get("max_concurrent");
    let mode: String = row.get("mode");
    QueueRow {
        id: row.get("id"),
        name: row.get("name"),
        is_active: is_active != 0,
        max_concurrent: max_concurrent.max(1) as usize,
        mode: QueueMode::from_str(&mode),
    }
}

impl Store {
    /// Fetch the built-in default queue, creating it on first use
    /// (`max_concurrent = 3`, parallel).
    pub async fn ensure_default_queue(&self) -> Result<QueueRow> {
        sqlx::query(
            "INSERT OR IGNORE INTO queues (name, is_active, max_concurrent, mode) VALUES (?1, 1, 3, 'parallel')",
        )
        .bind(DEFAULT_QUEUE_NAME)
        .execute(&self.pool)
        .await?;
        let row = sqlx::query(
            "SELECT id, name, is_active, max_concurrent, mode FROM queues WHERE name = ?1",
        )
        .bind(DEFAULT_QUEUE_NAME)
        .fetch_one(&self.pool)
        .await?;
        Ok(row_to_queue(&row))
    }

    /// Create a new queue. `max_concurrent` is clamped to at least 1.
    pub async fn insert_queue(
        &self,
        name: &str,
        max_concurrent: usize,
        mode: QueueMode,
    ) -> Result<QueueId> {
        let id = sqlx::query(
            "INSERT INTO queues (name, is_active, max_concurrent, mode) VALUES (?1, 1, ?2, ?3)",
        )
        .bind(name)
        .bind(max_concurrent.max(1) as i64)
        .bind(mode.as_str())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    pub async fn get_queue(&self, id: QueueId) -> Result<Option<QueueRow>> {
        let row = sqlx::query(
            "SELECT id, name, is_active, max_concurrent, mode FROM queues WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_queue))
    }

    pub async fn list_queues(&self) -> Result<Vec<QueueRow>> {
        let rows = sqlx::query(
            "SELECT id, name, is_active, max_concurrent, mode FROM queues ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_queue).collect())
    }

    pub async fn set_queue_active(&self, id: QueueId, is_active: bool) -> Result<()> {
        sqlx::query("UPDATE queues SET is_active = ?1 WHERE id = ?2")
            .bind(is_active as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_queue_max_concurrent(&self, id: QueueId, max_concurrent: usize) -> Result<()> {
        sqlx::query("UPDATE queues SET max_concurrent = ?1 WHERE id = ?2")
            .bind(max_concurrent.max(1) as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_queue_mode(&self, id: QueueId, mode: QueueMode) -> Result<()> {
        sqlx::query("UPDATE queues SET mode = ?1 WHERE id = ?2")
            .bind(mode.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a queue. Refuses while the queue still owns non-terminal tasks;
    /// reassign them first (`set_task_queue`).
    pub async fn delete_queue(&self, id: QueueId) -> Result<()> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM tasks
            WHERE queue_id = ?1 AND status NOT IN ('complete', 'error')
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        let n: i64 = row.get("n");
        if n > 0 {
            bail!("queue {} still owns {} non-terminal task(s)", id, n);
        }
        sqlx::query("DELETE FROM queues WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::db::testing::open_memory;
    use super::super::types::{Credentials, NewTask, TaskStatus};
    use super::*;

    #[tokio::test]
    async fn default_queue_created_once() {
        let store = open_memory().await.unwrap();
        let a = store.ensure_default_queue().await.unwrap();
        let b = store.ensure_default_queue().await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.name, DEFAULT_QUEUE_NAME);
        assert_eq!(a.max_concurrent, 3);
        assert_eq!(a.mode, QueueMode::Parallel);
        assert!(a.is_active);
        assert_eq!(store.list_queues().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn queue_settings_update() {
        let store = open_memory().await.unwrap();
        let id = store
            .insert_queue("night", 2, QueueMode::Sequential)
            .await
            .unwrap();
        let q = store.get_queue(id).await.unwrap().unwrap();
        assert_eq!(q.mode, QueueMode::Sequential);
        assert_eq!(q.effective_max(), 1);

        store.set_queue_mode(id, QueueMode::Parallel).await.unwrap();
        store.set_queue_max_concurrent(id, 5).await.unwrap();
        store.set_queue_active(id, false).await.unwrap();
        let q = store.get_queue(id).await.unwrap().unwrap();
        assert_eq!(q.mode, QueueMode::Parallel);
        assert_eq!(q.max_concurrent, 5);
        assert!(!q.is_active);
    }

    #[tokio::test]
    async fn delete_refuses_with_nonterminal_tasks() {
        let store = open_memory().await.unwrap();
        let id = store.insert_queue("q", 1, QueueMode::Parallel).await.unwrap();
        let task = store
            .insert_task(&NewTask {
                source_url: "https://example.com/f".into(),
                destination_path: "/tmp/f".into(),
                status: TaskStatus::Pending,
                credentials: Credentials::default(),
                connection_count: None,
                priority: 0,
                queue_id: Some(id),
            })
            .await
            .unwrap();

        assert!(store.delete_queue(id).await.is_err());

        store.set_task_status(task, TaskStatus::Complete).await.unwrap();
        store.delete_queue(id).await.unwrap();
        assert!(store.get_queue(id).await.unwrap().is_none());
    }
}

//! Task read/write operations.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::db::{timestamp_millis, Store};
use super::types::{Credentials, NewTask, QueueId, TaskId, TaskRow, TaskStatus};

fn row_to_task(row: &SqliteRow) -> TaskRow {
    let status: String = row.get("status");
    let total_size: i64 = row.get("total_size");
    let connection_count: Option<i64> = row.get("connection_count");
    TaskRow {
        id: row.get("id"),
        source_url: row.get("source_url"),
        resolved_url: row.get("resolved_url"),
        destination_path: row.get("destination_path"),
        total_size: total_size.max(0) as u64,
        status: TaskStatus::from_str(&status),
        etag: row.get("etag"),
        last_modified: row.get("last_modified"),
        credentials: Credentials {
            cookies: row.get("cookies"),
            referrer: row.get("referrer"),
            user_agent: row.get("user_agent"),
        },
        connection_count: connection_count.map(|n| n.max(1) as usize),
        priority: row.get("priority"),
        created_at: row.get("created_at"),
        queue_id: row.get("queue_id"),
        error_message: row.get("error_message"),
    }
}

const TASK_COLUMNS: &str = r#"
    id, source_url, resolved_url, destination_path, total_size, status,
    etag, last_modified, cookies, referrer, user_agent,
    connection_count, priority, created_at, queue_id, error_message
"#;

impl Store {
    /// Insert a new task. Metadata (size, validators, resolved URL) is filled
    /// in by the probe step later.
    pub async fn insert_task(&self, task: &NewTask) -> Result<TaskId> {
        let id = sqlx::query(
            r#"
            INSERT INTO tasks (
                source_url, destination_path, total_size, status,
                cookies, referrer, user_agent,
                connection_count, priority, created_at, queue_id
            ) VALUES (?1, ?2, 0, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&task.source_url)
        .bind(&task.destination_path)
        .bind(task.status.as_str())
        .bind(&task.credentials.cookies)
        .bind(&task.credentials.referrer)
        .bind(&task.credentials.user_agent)
        .bind(task.connection_count.map(|n| n as i64))
        .bind(task.priority)
        .bind(timestamp_millis())
        .bind(task.queue_id)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(id)
    }

    /// Fetch a single task.
    pub async fn get_task(&self, id: TaskId) -> Result<Option<TaskRow>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_task))
    }

    /// All tasks, newest first.
    pub async fn list_tasks(&self) -> Result<Vec<TaskRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_task).collect())
    }

    /// All tasks owned by one queue, oldest first.
    pub async fn list_tasks_in_queue(&self, queue_id: QueueId) -> Result<Vec<TaskRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE queue_id = ?1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(queue_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_task).collect())
    }

    /// Update the status of a task. Clears `error_message` unless the new
    /// status is `error` (use `set_error` for that transition).
    pub async fn set_task_status(&self, id: TaskId, status: TaskStatus) -> Result<()> {
        sqlx::query("UPDATE tasks SET status = ?1, error_message = NULL WHERE id = ?2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Transition a task to `error` with a human-readable reason.
    pub async fn set_task_error(&self, id: TaskId, message: &str) -> Result<()> {
        sqlx::query("UPDATE tasks SET status = 'error', error_message = ?1 WHERE id = ?2")
            .bind(message)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Pin validators after the first successful probe (I5: immutable after).
    pub async fn set_task_validators(
        &self,
        id: TaskId,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE tasks SET etag = ?1, last_modified = ?2 WHERE id = ?3")
            .bind(etag)
            .bind(last_modified)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record the post-redirect URL used for subsequent byte fetches.
    pub async fn set_task_resolved_url(&self, id: TaskId, url: &str) -> Result<()> {
        sqlx::query("UPDATE tasks SET resolved_url = ?1 WHERE id = ?2")
            .bind(url)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record the total size once known (including discovery at stream end).
    pub async fn set_task_total_size(&self, id: TaskId, total_size: u64) -> Result<()> {
        sqlx::query("UPDATE tasks SET total_size = ?1 WHERE id = ?2")
            .bind(total_size as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Change a task's priority (higher runs earlier).
    pub async fn set_task_priority(&self, id: TaskId, priority: i64) -> Result<()> {
        sqlx::query("UPDATE tasks SET priority = ?1 WHERE id = ?2")
            .bind(priority)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Move a task to another queue.
    pub async fn set_task_queue(&self, id: TaskId, queue_id: QueueId) -> Result<()> {
        sqlx::query("UPDATE tasks SET queue_id = ?1 WHERE id = ?2")
            .bind(queue_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove a task and (via cascade) its segments. File cleanup is the
    /// caller's concern.
    pub async fn delete_task(&self, id: TaskId) -> Result<()> {
        sqlx::query("DELETE FROM tasks WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Normalize tasks stranded in `connecting`/`running` (e.g. after a
    /// crash) back to `pending` so the queue manager re-admits them.
    /// Returns the number of tasks reset.
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let r = sqlx::query(
            "UPDATE tasks SET status = 'pending' WHERE status IN ('connecting', 'running')",
        )
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected())
    }

    /// Number of tasks currently counting against a queue's budget.
    pub async fn count_active_in_queue(&self, queue_id: QueueId) -> Result<usize> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM tasks WHERE queue_id = ?1 AND status IN ('connecting', 'running')",
        )
        .bind(queue_id)
        .fetch_one(&self.pool)
        .await?;
        let n: i64 = row.get("n");
        Ok(n.max(0) as usize)
    }

    /// Pending tasks of one queue in admission order:
    /// highest priority first, then FIFO by creation, then id.
    pub async fn list_pending_in_queue(&self, queue_id: QueueId) -> Result<Vec<TaskRow>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM tasks
            WHERE queue_id = ?1 AND status = 'pending'
            ORDER BY priority DESC, created_at ASC, id ASC
            "#
        ))
        .bind(queue_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_task).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::super::db::testing::open_memory;
    use super::*;

    fn new_task(url: &str, queue_id: QueueId) -> NewTask {
        NewTask {
            source_url: url.to_string(),
            destination_path: format!("/tmp/{}", url.rsplit('/').next().unwrap_or("x")),
            status: TaskStatus::Pending,
            credentials: Credentials::default(),
            connection_count: None,
            priority: 0,
            queue_id: Some(queue_id),
        }
    }

    #[tokio::test]
    async fn task_status_roundtrip_via_store() {
        let store = open_memory().await.unwrap();
        let q = store.ensure_default_queue().await.unwrap();
        let id = store
            .insert_task(&new_task("https://example.com/file.bin", q.id))
            .await
            .unwrap();

        let task = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.source_url, "https://example.com/file.bin");
        assert_eq!(task.fetch_url(), "https://example.com/file.bin");
        assert_eq!(task.total_size, 0);

        store.set_task_status(id, TaskStatus::Running).await.unwrap();
        assert_eq!(
            store.get_task(id).await.unwrap().unwrap().status,
            TaskStatus::Running
        );

        store.set_task_error(id, "connection failed: reset").await.unwrap();
        let task = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.error_message.as_deref(), Some("connection failed: reset"));

        // A later non-error transition clears the message.
        store.set_task_status(id, TaskStatus::Pending).await.unwrap();
        let task = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.error_message, None);
    }

    #[tokio::test]
    async fn recover_interrupted_resets_to_pending() {
        let store = open_memory().await.unwrap();
        let q = store.ensure_default_queue().await.unwrap();
        let a = store.insert_task(&new_task("https://a/x", q.id)).await.unwrap();
        let b = store.insert_task(&new_task("https://b/y", q.id)).await.unwrap();
        let c = store.insert_task(&new_task("https://c/z", q.id)).await.unwrap();
        store.set_task_status(a, TaskStatus::Running).await.unwrap();
        store.set_task_status(b, TaskStatus::Connecting).await.unwrap();
        store.set_task_status(c, TaskStatus::Paused).await.unwrap();

        let n = store.recover_interrupted().await.unwrap();
        assert_eq!(n, 2);
        assert_eq!(store.get_task(a).await.unwrap().unwrap().status, TaskStatus::Pending);
        assert_eq!(store.get_task(b).await.unwrap().unwrap().status, TaskStatus::Pending);
        // paused survives restarts
        assert_eq!(store.get_task(c).await.unwrap().unwrap().status, TaskStatus::Paused);
    }

    #[tokio::test]
    async fn pending_order_is_priority_then_fifo() {
        let store = open_memory().await.unwrap();
        let q = store.ensure_default_queue().await.unwrap();
        let mut low = new_task("https://a/1", q.id);
        low.priority = 0;
        let mut high = new_task("https://a/2", q.id);
        high.priority = 10;
        let mut mid = new_task("https://a/3", q.id);
        mid.priority = 5;

        let id_low = store.insert_task(&low).await.unwrap();
        let id_high = store.insert_task(&high).await.unwrap();
        let id_mid = store.insert_task(&mid).await.unwrap();

        let pending = store.list_pending_in_queue(q.id).await.unwrap();
        let ids: Vec<_> = pending.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![id_high, id_mid, id_low]);
    }

    #[tokio::test]
    async fn validators_and_metadata_roundtrip() {
        let store = open_memory().await.unwrap();
        let q = store.ensure_default_queue().await.unwrap();
        let id = store
            .insert_task(&new_task("https://example.com/file.iso", q.id))
            .await
            .unwrap();

        store
            .set_task_validators(id, Some("v1"), Some("Wed, 21 Oct 2015 07:28:00 GMT"))
            .await
            .unwrap();
        store.set_task_total_size(id, 1000).await.unwrap();
        store
            .set_task_resolved_url(id, "https://cdn.example.com/file.iso")
            .await
            .unwrap();

        let task = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.etag.as_deref(), Some("v1"));
        assert!(task.has_validators());
        assert_eq!(task.total_size, 1000);
        assert_eq!(task.fetch_url(), "https://cdn.example.com/file.iso");
        assert_eq!(task.source_url, "https://example.com/file.iso");
    }

    #[tokio::test]
    async fn delete_task_cascades_segments() {
        let store = open_memory().await.unwrap();
        let q = store.ensure_default_queue().await.unwrap();
        let id = store.insert_task(&new_task("https://a/f", q.id)).await.unwrap();
        store
            .replace_segments(
                id,
                &[crate::store::NewSegment {
                    start_offset: 0,
                    end_offset: Some(99),
                    current_offset: 0,
                }],
            )
            .await
            .unwrap();
        assert_eq!(store.list_segments(id).await.unwrap().len(), 1);

        store.delete_task(id).await.unwrap();
        assert!(store.get_task(id).await.unwrap().is_none());
        assert!(store.list_segments(id).await.unwrap().is_empty());
    }
}

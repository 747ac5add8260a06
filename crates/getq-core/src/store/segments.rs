//! Segment read/write operations: planning persistence, checkpointing, splits.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::db::Store;
use super::types::{NewSegment, SegmentId, SegmentRow, TaskId};

fn row_to_segment(row: &SqliteRow) -> SegmentRow {
    let start: i64 = row.get("start_offset");
    let end: Option<i64> = row.get("end_offset");
    let current: i64 = row.get("current_offset");
    SegmentRow {
        id: row.get("id"),
        task_id: row.get("task_id"),
        start_offset: start.max(0) as u64,
        end_offset: end.map(|e| e.max(0) as u64),
        current_offset: current.max(0) as u64,
    }
}

impl Store {
    /// Replace a task's segment plan atomically (used when the coordinator
    /// first partitions the file, or re-plans after a forced restart).
    pub async fn replace_segments(&self, task_id: TaskId, segments: &[NewSegment]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM segments WHERE task_id = ?1")
            .bind(task_id)
            .execute(&mut *tx)
            .await?;
        for seg in segments {
            sqlx::query(
                r#"
                INSERT INTO segments (task_id, start_offset, end_offset, current_offset)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(task_id)
            .bind(seg.start_offset as i64)
            .bind(seg.end_offset.map(|e| e as i64))
            .bind(seg.current_offset as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Segments of one task ordered by start offset.
    pub async fn list_segments(&self, task_id: TaskId) -> Result<Vec<SegmentRow>> {
        let rows = sqlx::query(
            r#"
            SELECT id, task_id, start_offset, end_offset, current_offset
            FROM segments
            WHERE task_id = ?1
            ORDER BY start_offset ASC
            "#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_segment).collect())
    }

    /// Checkpoint current offsets for several segments in one transaction.
    /// `current_offset` is the resume source of truth, so partial saves of a
    /// multi-segment task must never be observable.
    pub async fn save_segment_offsets(
        &self,
        offsets: &[(SegmentId, u64)],
    ) -> Result<()> {
        if offsets.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for (id, current) in offsets {
            sqlx::query("UPDATE segments SET current_offset = ?1 WHERE id = ?2")
                .bind(*current as i64)
                .bind(*id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Pin the end bound of a formerly unbounded segment once the stream
    /// finished and the true size is known.
    pub async fn set_segment_end(&self, id: SegmentId, end_offset: u64) -> Result<()> {
        sqlx::query("UPDATE segments SET end_offset = ?1 WHERE id = ?2")
            .bind(end_offset as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Bisect a segment: shrink the live row to `[.., mid - 1]` (persisting
    /// its current offset) and insert the new tail `[mid, old_end]`. One
    /// transaction so the coverage invariant holds at every persisted point.
    /// Returns the id of the new tail segment.
    pub async fn split_segment(
        &self,
        task_id: TaskId,
        id: SegmentId,
        current_offset: u64,
        mid: u64,
        old_end: u64,
    ) -> Result<SegmentId> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE segments SET end_offset = ?1, current_offset = ?2 WHERE id = ?3",
        )
        .bind((mid - 1) as i64)
        .bind(current_offset as i64)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        let new_id = sqlx::query(
            r#"
            INSERT INTO segments (task_id, start_offset, end_offset, current_offset)
            VALUES (?1, ?2, ?3, ?2)
            "#,
        )
        .bind(task_id)
        .bind(mid as i64)
        .bind(old_end as i64)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
        tx.commit().await?;
        Ok(new_id)
    }
}

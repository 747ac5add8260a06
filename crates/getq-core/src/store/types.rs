//! Row types for the task/segment/queue store.

/// Task identifier.
pub type TaskId = i64;
/// Segment identifier.
pub type SegmentId = i64;
/// Queue identifier.
pub type QueueId = i64;

/// Per-download status stored as a string in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Connecting,
    Running,
    Paused,
    Complete,
    Error,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Connecting => "connecting",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Complete => "complete",
            TaskStatus::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => TaskStatus::Pending,
            "connecting" => TaskStatus::Connecting,
            "running" => TaskStatus::Running,
            "paused" => TaskStatus::Paused,
            "complete" => TaskStatus::Complete,
            "error" => TaskStatus::Error,
            _ => TaskStatus::Error,
        }
    }

    /// Terminal states never leave the store on their own.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Error)
    }

    /// States that count against a queue's concurrency budget.
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Connecting | TaskStatus::Running)
    }
}

/// Queue scheduling mode. `Sequential` forces an effective concurrency of 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    Parallel,
    Sequential,
}

impl QueueMode {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueMode::Parallel => "parallel",
            QueueMode::Sequential => "sequential",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "sequential" => QueueMode::Sequential,
            _ => QueueMode::Parallel,
        }
    }
}

/// Opaque request credentials replayed verbatim by the range fetcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Raw `Cookie` header value ("k=v; k2=v2").
    pub cookies: Option<String>,
    /// `Referer` header value.
    pub referrer: Option<String>,
    /// `User-Agent` header value.
    pub user_agent: Option<String>,
}

impl Credentials {
    pub fn is_empty(&self) -> bool {
        self.cookies.is_none() && self.referrer.is_none() && self.user_agent.is_none()
    }
}

/// Full task record.
#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: TaskId,
    pub source_url: String,
    /// Post-redirect URL used for byte fetches once known.
    pub resolved_url: Option<String>,
    pub destination_path: String,
    /// Total size in bytes; 0 means unknown.
    pub total_size: u64,
    pub status: TaskStatus,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub credentials: Credentials,
    /// Per-task connection override; None falls back to the config default.
    pub connection_count: Option<usize>,
    pub priority: i64,
    pub created_at: i64,
    pub queue_id: Option<QueueId>,
    pub error_message: Option<String>,
}

impl TaskRow {
    /// URL to fetch bytes from: the resolved URL once redirects ran, else the original.
    pub fn fetch_url(&self) -> &str {
        self.resolved_url.as_deref().unwrap_or(&self.source_url)
    }

    /// True once the first successful probe pinned either validator.
    pub fn has_validators(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }
}

/// Payload for inserting a new task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub source_url: String,
    pub destination_path: String,
    pub status: TaskStatus,
    pub credentials: Credentials,
    pub connection_count: Option<usize>,
    pub priority: i64,
    pub queue_id: Option<QueueId>,
}

/// One byte range of a task. Bounds are inclusive; `end_offset` None is the
/// +inf sentinel used while the total size is unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRow {
    pub id: SegmentId,
    pub task_id: TaskId,
    pub start_offset: u64,
    pub end_offset: Option<u64>,
    /// Next byte to receive; starts at `start_offset`.
    pub current_offset: u64,
}

impl SegmentRow {
    /// A segment is complete once `current_offset` passed its end bound.
    pub fn is_complete(&self) -> bool {
        match self.end_offset {
            Some(end) => self.current_offset > end,
            None => false,
        }
    }

    /// Bytes still missing. None while the end bound is unknown.
    pub fn remaining(&self) -> Option<u64> {
        self.end_offset
            .map(|end| (end + 1).saturating_sub(self.current_offset))
    }

    /// Bytes already received for this segment.
    pub fn received(&self) -> u64 {
        self.current_offset.saturating_sub(self.start_offset)
    }
}

/// Payload for inserting a segment.
#[derive(Debug, Clone, Copy)]
pub struct NewSegment {
    pub start_offset: u64,
    pub end_offset: Option<u64>,
    pub current_offset: u64,
}

/// Scheduling container for tasks.
#[derive(Debug, Clone)]
pub struct QueueRow {
    pub id: QueueId,
    pub name: String,
    pub is_active: bool,
    pub max_concurrent: usize,
    pub mode: QueueMode,
}

impl QueueRow {
    /// Effective concurrency budget cap: 1 in sequential mode.
    pub fn effective_max(&self) -> usize {
        match self.mode {
            QueueMode::Sequential => 1,
            QueueMode::Parallel => self.max_concurrent.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for s in [
            TaskStatus::Pending,
            TaskStatus::Connecting,
            TaskStatus::Running,
            TaskStatus::Paused,
            TaskStatus::Complete,
            TaskStatus::Error,
        ] {
            assert_eq!(TaskStatus::from_str(s.as_str()), s);
        }
        assert_eq!(TaskStatus::from_str("garbage"), TaskStatus::Error);
    }

    #[test]
    fn segment_completion_math() {
        let mut seg = SegmentRow {
            id: 1,
            task_id: 1,
            start_offset: 100,
            end_offset: Some(199),
            current_offset: 100,
        };
        assert!(!seg.is_complete());
        assert_eq!(seg.remaining(), Some(100));
        assert_eq!(seg.received(), 0);

        seg.current_offset = 200;
        assert!(seg.is_complete());
        assert_eq!(seg.remaining(), Some(0));
        assert_eq!(seg.received(), 100);
    }

    #[test]
    fn unbounded_segment_never_complete() {
        let seg = SegmentRow {
            id: 1,
            task_id: 1,
            start_offset: 0,
            end_offset: None,
            current_offset: 4096,
        };
        assert!(!seg.is_complete());
        assert_eq!(seg.remaining(), None);
        assert_eq!(seg.received(), 4096);
    }

    #[test]
    fn sequential_queue_budget_is_one() {
        let q = QueueRow {
            id: 1,
            name: "q".into(),
            is_active: true,
            max_concurrent: 8,
            mode: QueueMode::Sequential,
        };
        assert_eq!(q.effective_max(), 1);
    }
}

//! Durable task/segment/queue store on SQLite.
//!
//! Every mutation is a single statement or an explicit transaction, so a
//! reader always observes a consistent row set. `current_offset` per segment
//! is the resume source of truth after a crash.

mod db;
mod queues;
mod segments;
mod tasks;
mod types;

pub use db::Store;
pub use queues::DEFAULT_QUEUE_NAME;
pub use types::{
    Credentials, NewSegment, NewTask, QueueId, QueueMode, QueueRow, SegmentId, SegmentRow, TaskId,
    TaskRow, TaskStatus,
};

#[cfg(test)]
pub(crate) use db::testing::open_memory;

//! Progress checkpointing while a task runs.
//!
//! Offsets are saved when they changed and at least 200 ms passed since the
//! last save, and unconditionally once per configured persistence interval.
//! Status transitions, segment completion, pause, and splits force a save
//! through `force`.

use anyhow::Result;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::store::{SegmentId, Store};
use crate::worker::SegmentState;

/// Minimum spacing between dirty saves.
pub(crate) const MIN_SAVE_SPACING: Duration = Duration::from_millis(200);

pub(crate) struct Checkpointer {
    store: Store,
    interval: Duration,
    last_save: Instant,
    last_saved: Vec<(SegmentId, u64)>,
}

fn snapshot(states: &[Arc<SegmentState>]) -> Vec<(SegmentId, u64)> {
    states
        .iter()
        .map(|s| (s.id, s.current.load(Ordering::Acquire)))
        .collect()
}

impl Checkpointer {
    pub fn new(store: Store, interval: Duration) -> Self {
        Checkpointer {
            store,
            interval: interval.max(MIN_SAVE_SPACING),
            last_save: Instant::now(),
            last_saved: Vec::new(),
        }
    }

    /// Periodic pass from the supervision loop.
    pub async fn tick(&mut self, states: &[Arc<SegmentState>]) -> Result<()> {
        let now = Instant::now();
        let offsets = snapshot(states);
        let dirty = offsets != self.last_saved;
        let since = now.duration_since(self.last_save);
        if (dirty && since >= MIN_SAVE_SPACING) || since >= self.interval {
            self.write(offsets, now).await?;
        }
        Ok(())
    }

    /// Unconditional save (status transition, completion, pause, split).
    pub async fn force(&mut self, states: &[Arc<SegmentState>]) -> Result<()> {
        let now = Instant::now();
        let offsets = snapshot(states);
        self.write(offsets, now).await
    }

    async fn write(&mut self, offsets: Vec<(SegmentId, u64)>, now: Instant) -> Result<()> {
        self.store.save_segment_offsets(&offsets).await?;
        self.last_saved = offsets;
        self.last_save = now;
        Ok(())
    }
}

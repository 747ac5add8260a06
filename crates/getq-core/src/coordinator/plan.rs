//! Segment partitioning math: initial plan and in-half split selection.

use std::sync::Arc;

use crate::store::NewSegment;
use crate::worker::SegmentState;

/// Initial segmentation never exceeds this many segments regardless of the
/// connection budget; the tail of the budget fills in through splits.
pub(crate) const INITIAL_SEGMENT_CAP: usize = 4;

/// A segment is only bisected while its remaining tail exceeds this
/// (2 x 256 KiB). Keeps split halves no smaller than 256 KiB, which is also
/// the write-clamp margin that makes shrinking a live bound safe.
pub(crate) const SPLIT_MIN_REMAINING: u64 = 2 * 256 * 1024;

/// Plan the initial segments for a ranged download of known size:
/// up to `min(connections, 4)` equal-width segments, the last one absorbing
/// the remainder. Returns one full-range segment for tiny files.
pub(crate) fn plan_initial_segments(total_size: u64, connections: usize) -> Vec<NewSegment> {
    if total_size == 0 {
        return Vec::new();
    }
    let mut count = connections.clamp(1, INITIAL_SEGMENT_CAP) as u64;
    count = count.min(total_size);
    let width = total_size / count;

    let mut out = Vec::with_capacity(count as usize);
    for i in 0..count {
        let start = i * width;
        let end = if i == count - 1 {
            total_size - 1
        } else {
            (i + 1) * width - 1
        };
        out.push(NewSegment {
            start_offset: start,
            end_offset: Some(end),
            current_offset: start,
        });
    }
    out
}

/// Chosen split: which state to bisect and at what midpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SplitPlan {
    pub index: usize,
    pub current: u64,
    pub mid: u64,
    pub old_end: u64,
}

/// Pick the incomplete bounded segment with the largest remaining tail
/// (ties: smallest start offset) and compute its bisection point. None when
/// no segment's remainder clears the split threshold.
pub(crate) fn pick_split_target(states: &[Arc<SegmentState>]) -> Option<SplitPlan> {
    let mut best: Option<(usize, u64, u64)> = None; // (index, remaining, start)
    for (index, state) in states.iter().enumerate() {
        if state.is_complete() {
            continue;
        }
        let Some(remaining) = state.remaining() else {
            continue;
        };
        let better = match best {
            None => true,
            Some((_, best_rem, best_start)) => {
                remaining > best_rem || (remaining == best_rem && state.start < best_start)
            }
        };
        if better {
            best = Some((index, remaining, state.start));
        }
    }

    let (index, remaining, _) = best?;
    if remaining <= SPLIT_MIN_REMAINING {
        return None;
    }
    let state = &states[index];
    let current = state.current.load(std::sync::atomic::Ordering::Acquire);
    let old_end = state.end.load(std::sync::atomic::Ordering::Acquire);
    let remaining = (old_end + 1).saturating_sub(current);
    if remaining <= SPLIT_MIN_REMAINING {
        return None;
    }
    Some(SplitPlan {
        index,
        current,
        mid: current + remaining / 2,
        old_end,
    })
}

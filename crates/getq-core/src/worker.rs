//! Segment worker: drives one byte range to completion.
//!
//! The worker owns write authority over `[current_offset, end_offset]` of
//! its segment. The end bound is a shared atomic the coordinator may shrink
//! during an in-half split; the worker reloads it before every positional
//! write and clamps each write to at most `MAX_WRITE` bytes, so a shrunk
//! bound is observed before the worker can reach bytes past the new end.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::DownloadError;
use crate::limiter::RateLimiter;
use crate::progress::ProgressBroadcaster;
use crate::retry::RetryPolicy;
use crate::store::{Credentials, SegmentId, SegmentRow, TaskId};
use crate::transport::Transport;
use crate::writer::DestFile;

/// Sentinel end bound while the total size is unknown.
pub(crate) const UNBOUNDED: u64 = u64::MAX;

/// Upper bound on a single positional write. Also the guarantee the split
/// margin relies on: a worker can overshoot a stale end bound by at most
/// this many bytes minus one.
pub(crate) const MAX_WRITE: usize = 64 * 1024;

/// Runtime state of one segment, shared between its worker and the
/// coordinator. Offsets are plain atomics; the worker is the only writer of
/// `current`, the coordinator the only writer of `end`.
#[derive(Debug)]
pub(crate) struct SegmentState {
    pub id: SegmentId,
    pub start: u64,
    pub current: AtomicU64,
    pub end: AtomicU64,
    pub complete: AtomicBool,
}

impl SegmentState {
    pub fn from_row(row: &SegmentRow) -> Self {
        SegmentState {
            id: row.id,
            start: row.start_offset,
            current: AtomicU64::new(row.current_offset),
            end: AtomicU64::new(row.end_offset.unwrap_or(UNBOUNDED)),
            complete: AtomicBool::new(row.is_complete()),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// Bytes still missing; None while the end bound is unknown.
    pub fn remaining(&self) -> Option<u64> {
        let end = self.end.load(Ordering::Acquire);
        if end == UNBOUNDED {
            return None;
        }
        Some((end + 1).saturating_sub(self.current.load(Ordering::Acquire)))
    }
}

/// Everything a worker needs to run one segment.
pub(crate) struct WorkerCtx {
    pub task_id: TaskId,
    pub url: String,
    pub creds: Credentials,
    pub transport: Transport,
    pub seg: Arc<SegmentState>,
    pub dest: DestFile,
    pub limiter: Arc<RateLimiter>,
    pub progress: Arc<ProgressBroadcaster>,
    /// Task-level downloaded byte counter shared by all sibling workers.
    pub downloaded: Arc<AtomicU64>,
    /// Task total; 0 while unknown.
    pub total_size: u64,
    pub pause: Arc<AtomicBool>,
    pub retry: RetryPolicy,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SegmentOutcome {
    /// Reached the end bound.
    Complete,
    /// Unknown-size stream ended naturally after this many bytes total.
    CompleteUnbounded { discovered: u64 },
    /// Stopped at a chunk boundary because the task was paused.
    Paused,
}

pub(crate) async fn run_segment(ctx: WorkerCtx) -> Result<SegmentOutcome, DownloadError> {
    let seg = &ctx.seg;
    let mut attempt: u32 = 0;

    loop {
        if ctx.pause.load(Ordering::Relaxed) {
            return Ok(SegmentOutcome::Paused);
        }

        let start = seg.current.load(Ordering::Acquire);
        let end = seg.end.load(Ordering::Acquire);
        if end != UNBOUNDED && start > end {
            seg.complete.store(true, Ordering::Release);
            return Ok(SegmentOutcome::Complete);
        }

        let bound = (end != UNBOUNDED).then_some(end);
        let (meta, mut stream) = match ctx.transport.fetch(&ctx.url, start, bound, &ctx.creds).await
        {
            Ok(ok) => ok,
            Err(DownloadError::ServiceUnavailable) => {
                attempt += 1;
                match ctx.retry.backoff(attempt) {
                    Some(delay) => {
                        tracing::debug!(
                            segment = seg.id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "503, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    None => return Err(DownloadError::ServiceUnavailable),
                }
            }
            Err(e) => return Err(e),
        };

        // A 200 on a resumed request means the origin ignored the Range and
        // is sending the body from byte zero; restart the segment there.
        if meta.status == 200 && start > seg.start {
            seg.current.store(seg.start, Ordering::Release);
            ctx.downloaded
                .fetch_sub(start - seg.start, Ordering::Relaxed);
        }

        let mut made_progress = false;
        while let Some(chunk) = stream.next_chunk().await {
            let chunk = chunk?;
            attempt = 0;
            made_progress = made_progress || !chunk.is_empty();

            if ctx.pause.load(Ordering::Relaxed) {
                return Ok(SegmentOutcome::Paused);
            }
            ctx.limiter.acquire(chunk.len()).await;

            let mut offset = seg.current.load(Ordering::Acquire);
            let mut buf = &chunk[..];
            let mut reached_end = false;
            while !buf.is_empty() {
                let end = seg.end.load(Ordering::Acquire);
                if end != UNBOUNDED && offset > end {
                    // The tail past a shrunk bound belongs to the new worker.
                    reached_end = true;
                    break;
                }
                let allowed = if end == UNBOUNDED {
                    buf.len()
                } else {
                    buf.len().min(((end + 1) - offset) as usize)
                };
                let n = allowed.min(MAX_WRITE);
                ctx.dest.write_at(&buf[..n], offset)?;
                offset += n as u64;
                buf = &buf[n..];
                seg.current.store(offset, Ordering::Release);
                ctx.downloaded.fetch_add(n as u64, Ordering::Relaxed);
                if end != UNBOUNDED && offset > end {
                    reached_end = true;
                    break;
                }
            }
            ctx.progress.update(
                ctx.task_id,
                ctx.downloaded.load(Ordering::Relaxed),
                ctx.total_size,
            );
            if reached_end {
                seg.complete.store(true, Ordering::Release);
                return Ok(SegmentOutcome::Complete);
            }
        }

        // Stream ended without an error.
        let end = seg.end.load(Ordering::Acquire);
        let current = seg.current.load(Ordering::Acquire);
        if end == UNBOUNDED {
            seg.complete.store(true, Ordering::Release);
            return Ok(SegmentOutcome::CompleteUnbounded { discovered: current });
        }
        if current > end {
            seg.complete.store(true, Ordering::Release);
            return Ok(SegmentOutcome::Complete);
        }

        // Premature end of a bounded stream: re-fetch from the advanced
        // offset. A round that moved nothing counts against the backoff
        // budget so a misbehaving origin cannot loop us forever.
        if !made_progress {
            attempt += 1;
            match ctx.retry.backoff(attempt) {
                Some(delay) => tokio::time::sleep(delay).await,
                None => {
                    return Err(DownloadError::ConnectionFailed(
                        "stream ended repeatedly without progress".to_string(),
                    ))
                }
            }
        }
        tracing::debug!(
            segment = seg.id,
            current,
            end,
            "stream ended early, refetching tail"
        );
    }
}

//! Global token-bucket rate limiter shared by all segment workers.
//!
//! One instance per process, owned by the application root and passed by
//! `Arc`. Capacity is twice the configured rate (a 2-second burst). Tokens
//! refill continuously from the wall-clock delta since the last refill,
//! capped at capacity. A rate of 0 disables limiting entirely.

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct Bucket {
    /// Bytes per second; 0 means disabled.
    rate: u64,
    /// 2 × rate.
    capacity: u64,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant) {
        if self.rate == 0 {
            return;
        }
        let elapsed = now.duration_since(self.last_refill);
        self.last_refill = now;
        let added = self.rate as f64 * elapsed.as_secs_f64();
        self.tokens = (self.tokens + added).min(self.capacity as f64);
    }
}

/// Token bucket gating aggregate download throughput.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// New limiter. `bytes_per_second = 0` disables limiting.
    pub fn new(bytes_per_second: u64) -> Self {
        RateLimiter {
            bucket: Mutex::new(Bucket {
                rate: bytes_per_second,
                capacity: bytes_per_second.saturating_mul(2),
                tokens: bytes_per_second as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Reconfigure the rate at runtime. Existing tokens are clamped to the
    /// new capacity; waiting acquirers pick the new rate up on their next
    /// refill pass.
    pub fn configure(&self, bytes_per_second: u64) {
        let mut b = self.bucket.lock().unwrap();
        b.refill(Instant::now());
        b.rate = bytes_per_second;
        b.capacity = bytes_per_second.saturating_mul(2);
        b.tokens = b.tokens.min(b.capacity as f64);
    }

    /// Currently configured rate in bytes per second (0 = disabled).
    pub fn rate(&self) -> u64 {
        self.bucket.lock().unwrap().rate
    }

    /// Suspend until `n` tokens are available, then take them. Returns
    /// immediately when limiting is disabled. Requests larger than the
    /// burst capacity are clamped to it so they can ever be satisfied.
    pub async fn acquire(&self, n: usize) {
        loop {
            let wait = {
                let mut b = self.bucket.lock().unwrap();
                if b.rate == 0 || n == 0 {
                    return;
                }
                let need = (n as u64).min(b.capacity) as f64;
                b.refill(Instant::now());
                if b.tokens >= need {
                    b.tokens -= need;
                    return;
                }
                // Sleep outside the lock for exactly the shortfall.
                Duration::from_secs_f64((need - b.tokens) / b.rate as f64)
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Nonblocking variant: take `n` tokens if available right now.
    pub fn try_acquire(&self, n: usize) -> bool {
        let mut b = self.bucket.lock().unwrap();
        if b.rate == 0 || n == 0 {
            return true;
        }
        let need = (n as u64).min(b.capacity) as f64;
        b.refill(Instant::now());
        if b.tokens >= need {
            b.tokens -= need;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_limiter_never_blocks() {
        let limiter = RateLimiter::new(0);
        limiter.acquire(usize::MAX).await;
        assert!(limiter.try_acquire(usize::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_paces_to_configured_rate() {
        let limiter = RateLimiter::new(1000);
        // Initial fill is one second's worth.
        limiter.acquire(1000).await;
        let before = Instant::now();
        // Next 500 bytes require 0.5 s of refill.
        limiter.acquire(500).await;
        let waited = before.elapsed();
        assert!(waited >= Duration::from_millis(490), "waited {:?}", waited);
        assert!(waited <= Duration::from_millis(600), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_capacity_is_twice_rate() {
        let limiter = RateLimiter::new(1000);
        // Let the bucket saturate well past 2 s.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(limiter.try_acquire(2000));
        assert!(!limiter.try_acquire(1));
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_request_clamped_to_capacity() {
        let limiter = RateLimiter::new(100);
        tokio::time::sleep(Duration::from_secs(5)).await;
        // 1 MiB request against a 200-byte bucket: clamped, not deadlocked.
        limiter.acquire(1 << 20).await;
        assert!(!limiter.try_acquire(100));
    }

    #[tokio::test]
    async fn reconfigure_changes_rate() {
        let limiter = RateLimiter::new(1000);
        assert_eq!(limiter.rate(), 1000);
        limiter.configure(0);
        assert_eq!(limiter.rate(), 0);
        limiter.acquire(usize::MAX).await;
    }
}

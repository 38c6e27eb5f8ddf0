//! Outbound message rate limiting.
//!
//! Sliding-window limiter shared by every send handle of one connection.
//! Exchanges typically cap inbound client messages (e.g. 5 per second);
//! exceeding the cap gets the socket closed by the server.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

pub struct RateLimiter {
    max_messages: u32,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_messages: u32, window: Duration) -> Self {
        Self {
            max_messages,
            window,
            timestamps: Mutex::new(VecDeque::with_capacity(max_messages as usize)),
        }
    }

    pub fn per_second(max_messages: u32) -> Self {
        Self::new(max_messages, Duration::from_secs(1))
    }

    /// Record a send if capacity remains. Returns `false` when limited.
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut timestamps = self.timestamps.lock();
        Self::evict(&mut timestamps, now, self.window);

        if timestamps.len() >= self.max_messages as usize {
            warn!(
                count = timestamps.len(),
                max = self.max_messages,
                "Outbound rate limit reached"
            );
            return false;
        }
        timestamps.push_back(now);
        true
    }

    /// Wait for a free slot and record the send.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let now = Instant::now();
                let mut timestamps = self.timestamps.lock();
                Self::evict(&mut timestamps, now, self.window);
                if timestamps.len() < self.max_messages as usize {
                    timestamps.push_back(now);
                    return;
                }
                timestamps
                    .front()
                    .map(|&oldest| (oldest + self.window).saturating_duration_since(now))
                    .unwrap_or_default()
            };
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    fn evict(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while timestamps
            .front()
            .is_some_and(|&t| now.saturating_duration_since(t) >= window)
        {
            timestamps.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test(start_paused = true)]
    async fn test_limit_within_window() {
        let limiter = RateLimiter::per_second(5);

        for _ in 0..5 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let limiter = RateLimiter::per_second(2);
        assert!(limiter.try_acquire());
        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_window() {
        let limiter = RateLimiter::per_second(1);
        assert!(limiter.try_acquire());

        let mut acquire = task::spawn(limiter.acquire());
        assert_pending!(acquire.poll());

        tokio::time::advance(Duration::from_millis(999)).await;
        assert_pending!(acquire.poll());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(acquire.is_woken());
        assert_ready!(acquire.poll());
        drop(acquire);

        // The slot was taken by `acquire`.
        assert!(!limiter.try_acquire());
    }
}

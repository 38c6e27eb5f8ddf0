//! Keep-alive tracking for a single connection.
//!
//! Owned by the connection task, so no locking. Uses `tokio::time::Instant`
//! so paused-clock tests can drive it.

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Ping/pong bookkeeping for one live session.
#[derive(Debug)]
pub struct Heartbeat {
    /// How often to send a probe.
    interval: Duration,
    /// How long to wait for the pong.
    timeout: Duration,
    last_ping: Option<Instant>,
    last_message: Instant,
    waiting_for_pong: bool,
    opened_at: Instant,
}

impl Heartbeat {
    pub fn new(interval_ms: u64, timeout_ms: u64) -> Self {
        let now = Instant::now();
        Self {
            interval: Duration::from_millis(interval_ms),
            timeout: Duration::from_millis(timeout_ms),
            last_ping: None,
            last_message: now,
            waiting_for_pong: false,
            opened_at: now,
        }
    }

    /// Reset for a freshly opened session.
    pub fn reset(&mut self, now: Instant) {
        self.last_ping = None;
        self.last_message = now;
        self.waiting_for_pong = false;
        self.opened_at = now;
    }

    pub fn record_ping(&mut self, now: Instant) {
        self.last_ping = Some(now);
        self.waiting_for_pong = true;
    }

    pub fn record_pong(&mut self, now: Instant) {
        self.waiting_for_pong = false;
        if let Some(ping) = self.last_ping {
            let rtt_ms = now.saturating_duration_since(ping).as_millis() as u64;
            debug!(rtt_ms, "Received pong");
        }
    }

    pub fn record_message(&mut self, now: Instant) {
        self.last_message = now;
    }

    /// A probe is outstanding and its pong is overdue.
    pub fn is_timed_out(&self, now: Instant) -> bool {
        match (self.waiting_for_pong, self.last_ping) {
            (true, Some(ping)) => now.saturating_duration_since(ping) > self.timeout,
            _ => false,
        }
    }

    /// One interval has passed since the last probe (or since open).
    pub fn should_probe(&self, now: Instant) -> bool {
        if self.waiting_for_pong {
            return false;
        }
        let since = self.last_ping.unwrap_or(self.opened_at);
        now.saturating_duration_since(since) >= self.interval
    }

    /// Granularity of the check timer.
    pub fn check_period(&self) -> Duration {
        (self.interval.min(self.timeout) / 2).max(Duration::from_millis(10))
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_message)
    }
}

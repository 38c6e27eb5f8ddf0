//! Backoff schedule for REST refetches.
//!
//! A failed snapshot or history fetch is retried on the same capped
//! exponential schedule the multiplexer uses for reconnects. The attempt
//! budget does not apply here: a fetch keeps retrying at the cap for as
//! long as the stream is open.

use mdstream_ws::Backoff;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub(crate) struct RetrySchedule {
    backoff: Backoff,
    failures: u32,
    due: Option<Instant>,
}

impl RetrySchedule {
    pub(crate) fn new(backoff: Backoff) -> Self {
        Self {
            backoff,
            failures: 0,
            due: None,
        }
    }

    /// Record a failure and arm the next attempt. Returns its delay.
    pub(crate) fn failed(&mut self) -> Duration {
        let delay = self.backoff.delay(self.failures);
        self.failures = self.failures.saturating_add(1);
        self.due = Some(Instant::now() + delay);
        delay
    }

    /// Forget failures and disarm.
    pub(crate) fn reset(&mut self) {
        self.failures = 0;
        self.due = None;
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.due.is_some()
    }

    pub(crate) fn failures(&self) -> u32 {
        self.failures
    }

    /// Resolves when the armed attempt is due; never resolves when disarmed.
    pub(crate) async fn wait(&self) {
        match self.due {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    }

    /// Disarm after the timer fired; failures are kept for the next delay.
    pub(crate) fn fire(&mut self) {
        self.due = None;
    }
}

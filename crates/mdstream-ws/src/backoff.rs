//! Reconnect backoff policy.

use std::time::Duration;

/// Exponential backoff with a hard cap and a maximum attempt count.
///
/// `delay(n) = min(base * 2^n, max)`. No jitter is applied, so successive
/// delays never decrease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    /// 0 = retry forever.
    max_attempts: u32,
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64, max_attempts: u32) -> Self {
        Self {
            base_ms,
            max_ms: max_ms.max(base_ms),
            max_attempts,
        }
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let exponent = retry.min(32);
        let delay = self.base_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_ms))
    }

    /// Whether `failures` consecutive failures exceed the attempt budget.
    pub fn exhausted(&self, failures: u32) -> bool {
        self.max_attempts > 0 && failures > self.max_attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn cap(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_until_cap() {
        let b = Backoff::new(1_000, 120_000, 0);
        assert_eq!(b.delay(0), Duration::from_secs(1));
        assert_eq!(b.delay(1), Duration::from_secs(2));
        assert_eq!(b.delay(2), Duration::from_secs(4));
        assert_eq!(b.delay(6), Duration::from_secs(64));
        assert_eq!(b.delay(7), Duration::from_secs(120));
        assert_eq!(b.delay(40), Duration::from_secs(120));
    }

    #[test]
    fn test_delays_non_decreasing_and_bounded() {
        let b = Backoff::new(250, 30_000, 0);
        let mut prev = Duration::ZERO;
        for n in 0..100 {
            let d = b.delay(n);
            assert!(d >= prev, "delay({n}) = {d:?} < {prev:?}");
            assert!(d <= b.cap());
            prev = d;
        }
    }

    #[test]
    fn test_exhaustion() {
        let b = Backoff::new(1_000, 120_000, 3);
        assert!(!b.exhausted(3));
        assert!(b.exhausted(4));

        let forever = Backoff::new(1_000, 120_000, 0);
        assert!(!forever.exhausted(u32::MAX));
    }
}

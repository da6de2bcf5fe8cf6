//! Timeout and retry policy shared by all blocking operations
//!
//! Every blocking call in the driver takes a `Timeout`: a wall-clock
//! deadline plus a retry cadence. `expired()` is a pure check against the
//! deadline; `retry()` sleeps until the next retry instant and reports
//! whether another attempt is allowed. Bus transactions (I2C, SPI) use
//! longer defaults than plain register access because they include
//! physical-layer delay on the far side.

use std::thread;
use std::time::{Duration, Instant};

/// Default deadline for a register read/write round trip.
const REGISTER_TIMEOUT: Duration = Duration::from_millis(500);
/// Default retry cadence for register access.
const REGISTER_RETRY: Duration = Duration::from_millis(50);
/// Deadline for the first version query after start/reset; ARP resolution
/// can stall the first exchange for many seconds.
const ENUMERATION_TIMEOUT: Duration = Duration::from_secs(30);
/// Retry cadence for the post-start version query.
const ENUMERATION_RETRY: Duration = Duration::from_millis(200);

/// Wall-clock deadline plus retry cadence.
///
/// Constructed once per operation; the deadline is absolute, so passing the
/// same `Timeout` through a chain of register accesses bounds the whole
/// chain, not each individual access.
#[derive(Debug, Clone)]
pub struct Timeout {
    deadline: Instant,
    retry_interval: Duration,
    next_retry: Instant,
}

impl Timeout {
    /// Create a timeout expiring `deadline` from now, retrying every
    /// `retry_interval`.
    pub fn new(deadline: Duration, retry_interval: Duration) -> Self {
        let now = Instant::now();
        Timeout {
            deadline: now + deadline,
            retry_interval,
            next_retry: now + retry_interval,
        }
    }

    /// Default policy for generic register access.
    pub fn register_access() -> Self {
        Self::new(REGISTER_TIMEOUT, REGISTER_RETRY)
    }

    /// Extended policy for the first exchange after start/reset, when the
    /// kernel may still be resolving ARP for the peer.
    pub fn enumeration() -> Self {
        Self::new(ENUMERATION_TIMEOUT, ENUMERATION_RETRY)
    }

    /// Has the deadline passed? Pure check, never sleeps.
    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Time remaining until the deadline, `None` once expired.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.checked_duration_since(Instant::now())
    }

    /// Sleep until the next retry instant. Returns `true` if another
    /// attempt is allowed, `false` if the deadline has passed.
    pub fn retry(&mut self) -> bool {
        let now = Instant::now();
        if now >= self.deadline {
            return false;
        }
        if self.next_retry > now {
            // never sleep past the deadline itself
            let wake = self.next_retry.min(self.deadline);
            thread::sleep(wake - now);
        }
        self.next_retry += self.retry_interval;
        !self.expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_timeout_not_expired() {
        let timeout = Timeout::new(Duration::from_secs(5), Duration::from_millis(10));
        assert!(!timeout.expired());
        assert!(timeout.remaining().is_some());
    }

    #[test]
    fn test_zero_deadline_expires_immediately() {
        let mut timeout = Timeout::new(Duration::ZERO, Duration::from_millis(1));
        assert!(timeout.expired());
        assert!(!timeout.retry());
        assert!(timeout.remaining().is_none());
    }

    #[test]
    fn test_retry_paces_attempts() {
        // 3 retry slots of 10ms inside a 100ms deadline
        let mut timeout = Timeout::new(Duration::from_millis(100), Duration::from_millis(10));
        let start = Instant::now();
        assert!(timeout.retry());
        assert!(timeout.retry());
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn test_retry_exhausts_at_deadline() {
        let mut timeout = Timeout::new(Duration::from_millis(30), Duration::from_millis(10));
        let mut attempts = 0;
        while timeout.retry() {
            attempts += 1;
            assert!(attempts < 100, "retry never exhausted");
        }
        assert!(timeout.expired());
    }

    #[test]
    fn test_bus_defaults_longer_than_register_default() {
        let timeouts = crate::config::TimeoutConfig::default();
        let register = timeouts.register_access();
        assert!(timeouts.i2c().deadline > register.deadline);
        assert!(timeouts.spi().deadline > register.deadline);
    }
}

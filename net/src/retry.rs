//! Retry with linear back-off for transient key server failures.

use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::NetError;

/// Retry policy for a single address.
///
/// Attempt `n` sleeps `base_delay * n` before the next try; the
/// accumulated back-off never exceeds `max_total_backoff`.
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_total_backoff: Duration,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy {
            max_retries: 10,
            base_delay: Duration::from_millis(750),
            max_total_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryStrategy {
    /// Runs `op` until it succeeds, fails terminally, or the attempt
    /// and back-off budgets are spent.  The attempt number (1-based)
    /// is passed through for logging.
    pub fn run<T>(
        &self,
        what: &str,
        mut op: impl FnMut(u32) -> Result<T, NetError>,
    ) -> Result<T, NetError> {
        let attempts = self.max_retries.max(1);
        let mut slept = Duration::ZERO;
        for attempt in 1..=attempts {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt < attempts => {
                    let delay = self.base_delay * attempt;
                    if slept + delay > self.max_total_backoff {
                        warn!(what, %error, "back-off budget spent; giving up");
                        return Err(error);
                    }
                    warn!(
                        what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "transient key server failure; backing off"
                    );
                    thread::sleep(delay);
                    slept += delay;
                }
                Err(error) => return Err(error),
            }
        }
        unreachable!("loop returns on the final attempt");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryStrategy {
        RetryStrategy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_total_backoff: Duration::from_secs(1),
        }
    }

    #[test]
    fn retries_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = fast(5).run("test", |_| {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(NetError::Status(503))
            } else {
                Ok("served")
            }
        });
        assert_eq!(result.unwrap(), "served");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn terminal_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast(5).run("test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(NetError::Status(403))
        });
        assert!(matches!(result, Err(NetError::Status(403))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn key_not_found_is_terminal() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast(5).run("test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(NetError::KeyNotFound)
        });
        assert!(matches!(result, Err(NetError::KeyNotFound)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn attempt_budget_is_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast(4).run("test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(NetError::Status(500))
        });
        assert!(matches!(result, Err(NetError::Status(500))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn backoff_budget_is_bounded() {
        let strategy = RetryStrategy {
            max_retries: 100,
            base_delay: Duration::from_millis(40),
            max_total_backoff: Duration::from_millis(100),
        };
        let calls = AtomicU32::new(0);
        let started = std::time::Instant::now();
        let result: Result<(), _> = strategy.run("test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(NetError::Status(502))
        });
        assert!(result.is_err());
        // 40 + 80 would already exceed the budget at the second sleep.
        assert!(calls.load(Ordering::SeqCst) <= 3);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}

//! One retry loop for every sink: exponential backoff, capped, transient
//! errors only.

use std::thread;
use std::time::Duration;

use solarfill_linkage::config::ApplyConfig;

use crate::error::SinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl From<&ApplyConfig> for RetryPolicy {
    fn from(apply: &ApplyConfig) -> Self {
        Self {
            max_retries: apply.max_retries,
            base_delay: Duration::from_millis(apply.base_delay_ms),
            max_delay: Duration::from_millis(apply.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Outcome of a retried operation.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, SinkError>,
    /// Total attempts made, including the first.
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails permanently, or retries run out.
/// A `Retry-After` hint replaces the computed delay, still capped.
pub fn with_retry<T>(
    policy: &RetryPolicy,
    label: &str,
    mut op: impl FnMut() -> Result<T, SinkError>,
) -> Attempted<T> {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match op() {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts,
                }
            }
            Err(err) if err.is_transient() && attempts <= policy.max_retries => {
                let delay = err
                    .retry_after_secs()
                    .map(|s| Duration::from_secs(s).min(policy.max_delay))
                    .unwrap_or_else(|| policy.delay_for(attempts - 1));
                tracing::warn!(
                    label,
                    retry = attempts,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying"
                );
                thread::sleep(delay);
            }
            Err(err) => {
                return Attempted {
                    result: Err(err),
                    attempts,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn instant(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    fn unavailable() -> SinkError {
        SinkError::Http {
            status: 503,
            message: "busy".into(),
            retry_after_secs: None,
        }
    }

    #[test]
    fn delay_doubles_then_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_secs(3));
        assert_eq!(policy.delay_for(40), Duration::from_secs(3));
    }

    #[test]
    fn transient_failure_then_success() {
        let calls = Cell::new(0);
        let out = with_retry(&instant(3), "t1", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(unavailable())
            } else {
                Ok("done")
            }
        });
        assert_eq!(out.result.unwrap(), "done");
        assert_eq!(out.attempts, 3);
    }

    #[test]
    fn gives_up_after_max_retries() {
        let out: Attempted<()> = with_retry(&instant(2), "t1", || Err(unavailable()));
        assert!(out.result.is_err());
        assert_eq!(out.attempts, 3);
    }

    #[test]
    fn permanent_error_is_not_retried() {
        let calls = Cell::new(0);
        let out: Attempted<()> = with_retry(&instant(5), "t1", || {
            calls.set(calls.get() + 1);
            Err(SinkError::Http {
                status: 404,
                message: "no such facility".into(),
                retry_after_secs: None,
            })
        });
        assert_eq!(out.attempts, 1);
        assert_eq!(calls.get(), 1);
        assert!(matches!(out.result, Err(SinkError::Http { status: 404, .. })));
    }

    #[test]
    fn policy_from_apply_config() {
        let apply = ApplyConfig::default();
        let policy = RetryPolicy::from(&apply);
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_millis(8_000));
    }
}

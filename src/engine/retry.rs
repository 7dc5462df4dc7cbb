//! Retry policy for slice retrieval

use super::types::ReadConfig;
use crate::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Retries retryable errors of a slice that has not forwarded any record
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Duration,
    poll: Duration,
}

impl RetryPolicy {
    /// Build the policy from a read config
    pub fn from_config(config: &ReadConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: config.retry_backoff(),
            poll: config.poll_timeout(),
        }
    }

    /// Whether `attempt` (0-based) may be retried after `err`.
    ///
    /// Once records of a slice have been handed on, a retry would
    /// duplicate them, so it is never allowed.
    pub fn allows(&self, err: &Error, forwarded: usize, attempt: u32) -> bool {
        err.is_retryable() && forwarded == 0 && attempt < self.max_retries
    }

    /// Sleep for the backoff, waking early on cancellation.
    ///
    /// Returns `false` if cancelled.
    pub fn pause(&self, cancel: &AtomicBool) -> bool {
        let deadline = Instant::now() + self.backoff;
        loop {
            if cancel.load(Ordering::Acquire) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(self.poll.min(deadline - now));
        }
    }
}

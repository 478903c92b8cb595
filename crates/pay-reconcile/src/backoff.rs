//! Capped exponential wait schedule for the synchronous checkout path.
//!
//! After a sale without an immediate redirect, the engine polls the provider
//! a bounded number of times before handing the order to the periodic sweep.
//! The schedule doubles from `initial_delay` and is truncated so the summed
//! waits never exceed `max_total_wait`.

use std::time::Duration;

use pay_config::RedirectWaitSettings;

#[derive(Debug, Clone, Copy)]
pub struct RedirectWaitPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_total_wait: Duration,
}

impl RedirectWaitPolicy {
    /// The delay before each status attempt, in order. Length is at most
    /// `max_attempts`; the cumulative sum stays within `max_total_wait`.
    pub fn delays(&self) -> Vec<Duration> {
        let mut out = Vec::new();
        let mut next = self.initial_delay;
        let mut total = Duration::ZERO;
        for _ in 0..self.max_attempts {
            if total + next > self.max_total_wait {
                break;
            }
            total += next;
            out.push(next);
            next = next.saturating_mul(2);
        }
        out
    }
}

impl From<RedirectWaitSettings> for RedirectWaitPolicy {
    fn from(s: RedirectWaitSettings) -> Self {
        Self {
            max_attempts: s.max_attempts,
            initial_delay: Duration::from_millis(s.initial_delay_ms),
            max_total_wait: Duration::from_millis(s.max_total_wait_ms),
        }
    }
}

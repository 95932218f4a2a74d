//! Bounded retry with a fixed pause
//!
//! [`Attempts`] hands out attempt numbers and sleeps between them, so the
//! caller keeps ownership of whatever it retries (typically a `&mut`
//! transport) inside an ordinary `while let` loop:
//!
//! ```rust
//! # async fn demo() {
//! use std::time::Duration;
//! use voltage_meter_logger::RetryPolicy;
//!
//! let policy = RetryPolicy::fixed(2, Duration::from_millis(20));
//! let mut attempts = policy.attempts();
//! while let Some(attempt) = attempts.next().await {
//!     if attempt == 2 {
//!         break;
//!     }
//! }
//! assert_eq!(attempts.made(), 2);
//! # }
//! ```

use std::time::Duration;

use tracing::trace;

/// Retry policy: attempt budget and the pause before each retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first (at least 1 is always made)
    pub max_attempts: u32,
    /// Pause before every attempt after the first
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(2, Duration::from_millis(20))
    }
}

impl RetryPolicy {
    /// Same delay before every retry
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Delay before attempt `attempt` (1-based). The first attempt never waits.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            Duration::ZERO
        } else {
            self.delay
        }
    }

    /// Start a fresh attempt sequence
    pub fn attempts(&self) -> Attempts {
        Attempts {
            policy: *self,
            made: 0,
        }
    }
}

/// Iterator-like attempt counter driven by [`Attempts::next`]
#[derive(Debug)]
pub struct Attempts {
    policy: RetryPolicy,
    made: u32,
}

impl Attempts {
    /// Wait as the policy requires and return the next attempt number, or
    /// `None` when the budget is spent.
    pub async fn next(&mut self) -> Option<u32> {
        if self.made >= self.policy.max_attempts.max(1) {
            return None;
        }
        self.made += 1;
        let delay = self.policy.delay_before(self.made);
        if !delay.is_zero() {
            trace!("retry attempt {} after {:?}", self.made, delay);
            tokio::time::sleep(delay).await;
        }
        Some(self.made)
    }

    /// Attempts handed out so far
    pub fn made(&self) -> u32 {
        self.made
    }

    /// Whether another attempt is available
    pub fn remaining(&self) -> u32 {
        self.policy.max_attempts.max(1).saturating_sub(self.made)
    }
}

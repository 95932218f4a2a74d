//! # Poll Timing Configuration
//!
//! Delays and deadlines of the acquisition loop. Constrained field devices
//! and RS485 gateways behind a Modbus TCP bridge need breathing room between
//! requests; every pause the scheduler takes is configured here.
//!
//! | Setting | Default | Applies to |
//! |---------|---------|------------|
//! | `group_attempts` | 2 | reads per register group |
//! | `group_retry_delay_ms` | 20 | pause before retrying a group |
//! | `inter_group_delay_ms` | 5 | between groups of one meter |
//! | `inter_meter_delay_ms` | 200 | after each meter |
//! | `inter_cycle_delay_ms` | 500 | after a full cycle |
//! | `reconnect_backoff_ms` | 5000 | after a failed connect |
//! | `connect_timeout_ms` | 500 | TCP connect |
//! | `response_timeout_ms` | 500 | send and each receive step |

use std::time::Duration;

use serde::Deserialize;

use crate::retry::RetryPolicy;

/// Default attempts per register group.
pub const DEFAULT_GROUP_ATTEMPTS: u32 = 2;

/// Default delay before a group retry in milliseconds.
pub const DEFAULT_GROUP_RETRY_DELAY_MS: u64 = 20;

/// Default delay between groups in milliseconds.
pub const DEFAULT_INTER_GROUP_DELAY_MS: u64 = 5;

/// Default delay between meters in milliseconds.
pub const DEFAULT_INTER_METER_DELAY_MS: u64 = 200;

/// Default delay between cycles in milliseconds.
pub const DEFAULT_INTER_CYCLE_DELAY_MS: u64 = 500;

/// Default backoff after a failed connect in milliseconds.
pub const DEFAULT_RECONNECT_BACKOFF_MS: u64 = 5000;

/// Default TCP connect deadline in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 500;

/// Default response deadline in milliseconds.
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 500;

/// Acquisition loop timing.
///
/// # Example
///
/// ```rust
/// use voltage_meter_logger::PollTiming;
///
/// // A slow gateway that needs more time between meters
/// let timing = PollTiming::new()
///     .with_inter_meter_delay_ms(500)
///     .with_response_timeout_ms(2000);
///
/// assert_eq!(timing.inter_meter_delay_ms, 500);
/// assert_eq!(timing.group_attempts, 2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PollTiming {
    /// Reads per register group, including the first.
    pub group_attempts: u32,
    /// Pause before retrying a group (milliseconds).
    pub group_retry_delay_ms: u64,
    /// Pause between groups of one meter (milliseconds).
    pub inter_group_delay_ms: u64,
    /// Pause after each meter (milliseconds).
    pub inter_meter_delay_ms: u64,
    /// Pause after each full cycle (milliseconds).
    pub inter_cycle_delay_ms: u64,
    /// Pause after a failed connect (milliseconds).
    pub reconnect_backoff_ms: u64,
    /// TCP connect deadline (milliseconds).
    pub connect_timeout_ms: u64,
    /// Deadline for the send and for each receive step (milliseconds).
    pub response_timeout_ms: u64,
}

impl PollTiming {
    pub fn new() -> Self {
        Self::default()
    }

    /// All pauses zeroed, deadlines kept. Useful against simulators.
    pub fn immediate() -> Self {
        Self {
            group_retry_delay_ms: 0,
            inter_group_delay_ms: 0,
            inter_meter_delay_ms: 0,
            inter_cycle_delay_ms: 0,
            reconnect_backoff_ms: 0,
            ..Self::default()
        }
    }

    pub fn with_group_attempts(mut self, attempts: u32) -> Self {
        self.group_attempts = attempts;
        self
    }

    pub fn with_group_retry_delay_ms(mut self, delay_ms: u64) -> Self {
        self.group_retry_delay_ms = delay_ms;
        self
    }

    pub fn with_inter_group_delay_ms(mut self, delay_ms: u64) -> Self {
        self.inter_group_delay_ms = delay_ms;
        self
    }

    pub fn with_inter_meter_delay_ms(mut self, delay_ms: u64) -> Self {
        self.inter_meter_delay_ms = delay_ms;
        self
    }

    pub fn with_inter_cycle_delay_ms(mut self, delay_ms: u64) -> Self {
        self.inter_cycle_delay_ms = delay_ms;
        self
    }

    pub fn with_reconnect_backoff_ms(mut self, delay_ms: u64) -> Self {
        self.reconnect_backoff_ms = delay_ms;
        self
    }

    pub fn with_connect_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = timeout_ms;
        self
    }

    pub fn with_response_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.response_timeout_ms = timeout_ms;
        self
    }

    /// Retry policy for one register group
    pub fn group_retry(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.group_attempts,
            Duration::from_millis(self.group_retry_delay_ms),
        )
    }

    pub fn inter_group_delay(&self) -> Duration {
        Duration::from_millis(self.inter_group_delay_ms)
    }

    pub fn inter_meter_delay(&self) -> Duration {
        Duration::from_millis(self.inter_meter_delay_ms)
    }

    pub fn inter_cycle_delay(&self) -> Duration {
        Duration::from_millis(self.inter_cycle_delay_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Reasons these values cannot drive the loop, if any
    pub fn check(&self) -> Result<(), String> {
        if self.group_attempts == 0 {
            return Err("group_attempts must be at least 1".to_string());
        }
        if self.connect_timeout_ms == 0 || self.response_timeout_ms == 0 {
            return Err("timeouts must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            group_attempts: DEFAULT_GROUP_ATTEMPTS,
            group_retry_delay_ms: DEFAULT_GROUP_RETRY_DELAY_MS,
            inter_group_delay_ms: DEFAULT_INTER_GROUP_DELAY_MS,
            inter_meter_delay_ms: DEFAULT_INTER_METER_DELAY_MS,
            inter_cycle_delay_ms: DEFAULT_INTER_CYCLE_DELAY_MS,
            reconnect_backoff_ms: DEFAULT_RECONNECT_BACKOFF_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing() {
        let timing = PollTiming::default();
        assert_eq!(timing.group_attempts, 2);
        assert_eq!(timing.inter_group_delay(), Duration::from_millis(5));
        assert_eq!(timing.inter_meter_delay(), Duration::from_millis(200));
        assert_eq!(timing.inter_cycle_delay(), Duration::from_millis(500));
        assert_eq!(timing.reconnect_backoff(), Duration::from_secs(5));
        assert_eq!(timing.response_timeout(), Duration::from_millis(500));
        assert!(timing.check().is_ok());
    }

    #[test]
    fn test_group_retry_policy() {
        let policy = PollTiming::new().with_group_attempts(3).group_retry();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay, Duration::from_millis(20));
    }

    #[test]
    fn test_immediate_keeps_deadlines() {
        let timing = PollTiming::immediate();
        assert_eq!(timing.inter_meter_delay_ms, 0);
        assert_eq!(timing.reconnect_backoff_ms, 0);
        assert_eq!(timing.response_timeout_ms, DEFAULT_RESPONSE_TIMEOUT_MS);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let timing: PollTiming =
            serde_json::from_str(r#"{"inter_meter_delay_ms": 50, "group_attempts": 3}"#).unwrap();
        assert_eq!(timing.inter_meter_delay_ms, 50);
        assert_eq!(timing.group_attempts, 3);
        assert_eq!(timing.inter_cycle_delay_ms, DEFAULT_INTER_CYCLE_DELAY_MS);
    }

    #[test]
    fn test_check_rejects_zero_attempts() {
        assert!(PollTiming::new().with_group_attempts(0).check().is_err());
        assert!(PollTiming::new().with_response_timeout_ms(0).check().is_err());
    }
}

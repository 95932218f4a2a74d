//! Restart policy for the poll loop
//!
//! An error or panic that escapes [`PollScheduler::run`] closes the session
//! and restarts the loop after a fixed delay. More than `max_failures`
//! failures in a row, with no completed cycle in between, end the process.

use std::any::Any;
use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use serde::Deserialize;
use tracing::{error, warn};

use crate::error::{MeterError, MeterResult};
use crate::ingest::Ingestion;
use crate::scheduler::PollScheduler;
use crate::session::RegisterTransport;

fn default_max_failures() -> u32 {
    10
}

fn default_restart_delay_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SupervisorPolicy {
    /// Failures tolerated before giving up
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
}

impl Default for SupervisorPolicy {
    fn default() -> Self {
        Self {
            max_failures: default_max_failures(),
            restart_delay_ms: default_restart_delay_ms(),
        }
    }
}

impl SupervisorPolicy {
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Supervisor {
    policy: SupervisorPolicy,
    failures: u32,
}

impl Supervisor {
    pub fn new(policy: SupervisorPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Count one failure. `progressed` resets the streak first.
    ///
    /// Returns the terminal error once the limit is exceeded.
    fn record_failure(&mut self, progressed: bool) -> Option<MeterError> {
        if progressed {
            self.failures = 0;
        }
        self.failures += 1;
        if self.failures > self.policy.max_failures {
            Some(MeterError::FailureThreshold {
                failures: self.failures,
                limit: self.policy.max_failures,
            })
        } else {
            None
        }
    }

    /// Keep `scheduler` running until the failure limit is exceeded.
    pub async fn supervise<T, I>(
        &mut self,
        scheduler: &mut PollScheduler<T, I>,
    ) -> MeterResult<Infallible>
    where
        T: RegisterTransport,
        I: Ingestion,
    {
        loop {
            let cycles_before = scheduler.cycles_completed();
            let err = match AssertUnwindSafe(scheduler.run()).catch_unwind().await {
                Ok(Ok(never)) => match never {},
                Ok(Err(e)) => e,
                Err(panic) => MeterError::internal(format!(
                    "poll loop panicked: {}",
                    panic_message(panic.as_ref())
                )),
            };
            scheduler.shutdown().await;

            let progressed = scheduler.cycles_completed() > cycles_before;
            if let Some(fatal) = self.record_failure(progressed) {
                error!("Modbus Logger Error: {}. Too many errors, exiting", err);
                return Err(fatal);
            }

            warn!(
                "Modbus Logger Error: {}. Error count: {}/{}. Restarting in {}s",
                err,
                self.failures,
                self.policy.max_failures,
                self.policy.restart_delay().as_secs_f32()
            );
            tokio::time::sleep(self.policy.restart_delay()).await;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::{Parameter, ParameterSpec};
    use crate::planner::RegisterPlanner;
    use crate::scheduler::MeterContext;
    use crate::test_support::{MockGateway, RecordingIngest};
    use crate::config::DeviceConfig;
    use crate::timing::PollTiming;
    use crate::validator::Validator;
    use crate::value::DataType;
    use tokio::time::Instant;

    #[test]
    fn test_policy_defaults() {
        let policy: SupervisorPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(policy, SupervisorPolicy::default());
        assert_eq!(policy.max_failures, 10);
        assert_eq!(policy.restart_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_streak_resets_after_progress() {
        let mut supervisor = Supervisor::new(SupervisorPolicy {
            max_failures: 2,
            restart_delay_ms: 0,
        });
        assert!(supervisor.record_failure(false).is_none());
        assert!(supervisor.record_failure(false).is_none());
        assert!(supervisor.record_failure(true).is_none());
        assert_eq!(supervisor.failures(), 1);
        assert!(supervisor.record_failure(false).is_none());
        assert!(matches!(
            supervisor.record_failure(false),
            Some(MeterError::FailureThreshold {
                failures: 3,
                limit: 2
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_eleven_failures() {
        let mut gateway = MockGateway::new();
        gateway.connect_fatal = true;

        let device = DeviceConfig {
            name: "A".to_string(),
            model: "TEST".to_string(),
            unit_id: 1,
            function_code: 0x03,
            parameters: vec![(Parameter::Voltage, ParameterSpec::new(0, 2, DataType::Float))],
        };
        let mut scheduler = PollScheduler::new(
            gateway,
            RecordingIngest::new(),
            vec![MeterContext::new(device, &RegisterPlanner::new())],
            Validator::default(),
            PollTiming::immediate(),
        );

        let started = Instant::now();
        let mut supervisor = Supervisor::new(SupervisorPolicy::default());
        let err = supervisor.supervise(&mut scheduler).await.unwrap_err();

        assert!(matches!(
            err,
            MeterError::FailureThreshold {
                failures: 11,
                limit: 10
            }
        ));
        assert!(err.is_fatal());
        assert_eq!(scheduler.transport().connect_attempts, 11);
        // Ten restarts, five seconds each
        assert_eq!(started.elapsed(), Duration::from_secs(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_cycle_is_counted_and_restarted() {
        let mut gateway = MockGateway::new();
        gateway.panic_on_read = true;
        gateway.set_float(1, 0, 230.0);

        let device = DeviceConfig {
            name: "A".to_string(),
            model: "TEST".to_string(),
            unit_id: 1,
            function_code: 0x03,
            parameters: vec![(Parameter::Voltage, ParameterSpec::new(0, 2, DataType::Float))],
        };
        let mut scheduler = PollScheduler::new(
            gateway,
            RecordingIngest::new(),
            vec![MeterContext::new(device, &RegisterPlanner::new())],
            Validator::default(),
            PollTiming::immediate(),
        );

        let started = Instant::now();
        let mut supervisor = Supervisor::new(SupervisorPolicy::default());
        let err = supervisor.supervise(&mut scheduler).await.unwrap_err();

        assert!(matches!(
            err,
            MeterError::FailureThreshold {
                failures: 11,
                limit: 10
            }
        ));
        // Each restart reconnected and reached the gateway again
        assert_eq!(scheduler.transport().connect_attempts, 11);
        assert_eq!(scheduler.transport().requests.len(), 11);
        assert!(!scheduler.transport().is_connected());
        assert_eq!(scheduler.cycles_completed(), 0);
        assert!(scheduler.ingest().deliveries().is_empty());
        assert_eq!(started.elapsed(), Duration::from_secs(50));
    }

    #[test]
    fn test_panic_message() {
        let text: Box<dyn Any + Send> = Box::new("static text");
        let owned: Box<dyn Any + Send> = Box::new(String::from("formatted 7"));
        let other: Box<dyn Any + Send> = Box::new(7u32);
        assert_eq!(panic_message(text.as_ref()), "static text");
        assert_eq!(panic_message(owned.as_ref()), "formatted 7");
        assert_eq!(panic_message(other.as_ref()), "unknown panic payload");
    }
}

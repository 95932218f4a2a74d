//! Periodic liveness probe of the ingestion endpoint
//!
//! Runs beside the poll loop on the same thread. It only logs; it never
//! touches the gateway session or the scheduler.

use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::MeterResult;
use crate::ingest::Ingestion;

fn default_interval_secs() -> u64 {
    300
}

fn default_retry_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct HealthCheckConfig {
    /// Delay after a check that reached the endpoint
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Delay after a check that could not reach it
    #[serde(default = "default_retry_secs")]
    pub retry_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            retry_secs: default_retry_secs(),
        }
    }
}

impl HealthCheckConfig {
    /// How long to wait after a check with this outcome
    pub fn next_delay(&self, outcome: &MeterResult<bool>) -> Duration {
        match outcome {
            Ok(_) => Duration::from_secs(self.interval_secs),
            Err(_) => Duration::from_secs(self.retry_secs),
        }
    }
}

/// Check now, then keep checking forever.
pub async fn health_check_worker<I: Ingestion>(ingest: &I, config: HealthCheckConfig) {
    loop {
        let outcome = ingest.health_check().await;
        match &outcome {
            Ok(true) => info!("API health check passed"),
            Ok(false) => warn!("API health check failed"),
            Err(e) => warn!("API health check error: {}", e),
        }
        tokio::time::sleep(config.next_delay(&outcome)).await;
    }
}

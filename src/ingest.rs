//! Ingestion endpoint client
//!
//! Decoded values leave the logger through [`Ingestion::deliver`]. The HTTP
//! implementation posts one JSON document per delivery:
//!
//! ```text
//! POST {base_url}/api/ingest/
//! {"meter_name": "Meter 1", "timestamp": 1700000000, "readings": {"Voltage": 230.0}}
//! ```
//!
//! A delivery either succeeds (HTTP 201) or fails; failures are reported to
//! the caller and never retried or buffered here.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{MeterError, MeterResult};
use crate::reading::ReadingValues;

/// Default ingestion service URL
pub const DEFAULT_BASE_URL: &str = "http://backend:8000";

/// Longest response body quoted in a delivery error
const MAX_ERROR_BODY: usize = 200;

/// Receiver of decoded readings
pub trait Ingestion: Send + Sync {
    /// Hand over one subset of a reading.
    fn deliver(
        &self,
        meter: &str,
        timestamp: i64,
        values: &ReadingValues,
    ) -> impl Future<Output = MeterResult<()>> + Send;

    /// Liveness probe. `Ok(false)` means the endpoint answered but is not
    /// healthy; `Err` means it could not be reached.
    fn health_check(&self) -> impl Future<Output = MeterResult<bool>> + Send;
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_ingest_timeout_secs() -> u64 {
    30
}

fn default_health_timeout_secs() -> u64 {
    10
}

/// Where the ingestion service lives
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_ingest_timeout_secs")]
    pub ingest_timeout_secs: u64,
    #[serde(default = "default_health_timeout_secs")]
    pub health_timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ingest_timeout_secs: default_ingest_timeout_secs(),
            health_timeout_secs: default_health_timeout_secs(),
        }
    }
}

impl IngestConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub fn ingest_url(&self) -> String {
        self.endpoint("/api/ingest/")
    }

    pub fn health_url(&self) -> String {
        self.endpoint("/health/")
    }
}

#[derive(Debug, Serialize)]
struct IngestPayload<'a> {
    meter_name: &'a str,
    timestamp: i64,
    readings: &'a ReadingValues,
}

/// HTTP client for the ingestion service. Cheap to clone.
#[derive(Debug, Clone)]
pub struct HttpIngestClient {
    client: reqwest::Client,
    config: IngestConfig,
}

impl HttpIngestClient {
    pub fn new(config: IngestConfig) -> MeterResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| MeterError::configuration(format!("HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }
}

impl Ingestion for HttpIngestClient {
    async fn deliver(&self, meter: &str, timestamp: i64, values: &ReadingValues) -> MeterResult<()> {
        let payload = IngestPayload {
            meter_name: meter,
            timestamp,
            readings: values,
        };

        let response = self
            .client
            .post(self.config.ingest_url())
            .timeout(Duration::from_secs(self.config.ingest_timeout_secs))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::CREATED {
            debug!("{}: delivered {} values @{}", meter, values.len(), timestamp);
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let body: String = body.chars().take(MAX_ERROR_BODY).collect();
        warn!("{}: ingestion rejected delivery: HTTP {} {}", meter, status, body);
        Err(MeterError::delivery(format!("HTTP {}: {}", status, body)))
    }

    async fn health_check(&self) -> MeterResult<bool> {
        let response = self
            .client
            .get(self.config.health_url())
            .timeout(Duration::from_secs(self.config.health_timeout_secs))
            .send()
            .await?;
        Ok(response.status() == reqwest::StatusCode::OK)
    }
}

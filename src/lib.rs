//! # Voltage Meter Logger - Modbus TCP Meter Acquisition
//!
//! Polls electrical meters behind one Modbus TCP gateway, decodes their
//! registers, checks the values against physical bounds and forwards them
//! to an HTTP ingestion service at two cadences:
//!
//! - **instant** quantities (voltage, current, power, ...) every cycle;
//! - **minute** counters (energy, demand) once per wall-clock minute,
//!   stamped with the start of that minute.
//!
//! ## Pipeline
//!
//! ```text
//! catalog + meter list ──▶ RegisterPlanner ──▶ RegisterGroup[] (per meter)
//!                                                   │
//! PollScheduler ──▶ DeviceReader ──▶ TcpSession ──▶ gateway ──▶ meters
//!      │                 │
//!      │                 └──▶ decode_value (byte order, type, scale)
//!      ├──▶ Validator
//!      └──▶ Ingestion (POST /api/ingest/)
//! ```
//!
//! All device I/O is serialized on a single session. A session that timed
//! out or lost frame sync is closed and reopened on the next cycle, never
//! reused.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use voltage_meter_logger::{
//!     AppConfig, HttpIngestClient, MeterResult, PollScheduler, Supervisor, TcpSession,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> MeterResult<()> {
//!     let config = AppConfig::load("setting.json")?;
//!     let session = TcpSession::new(config.settings.session_config());
//!     let ingest = HttpIngestClient::new(config.settings.ingest.clone())?;
//!
//!     let mut scheduler = PollScheduler::from_config(&config, session, ingest);
//!     let mut supervisor = Supervisor::new(config.settings.supervisor);
//!     supervisor.supervise(&mut scheduler).await?;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Wire protocol
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus protocol constants
pub mod constants;

/// Stack-allocated PDU and read request builder
pub mod pdu;

/// MBAP framing of register reads
pub mod codec;

/// Persistent gateway session
pub mod session;

// ============================================================================
// Decoding and planning
// ============================================================================

/// Byte-order permutations for multi-register values
pub mod byte_order;

/// Register span to number
pub mod value;

/// Parameter identities and register metadata
pub mod parameter;

/// Batch-read planning
pub mod planner;

/// Bounded retry helper
pub mod retry;

/// Per-meter group reads
pub mod reader;

// ============================================================================
// Acquisition loop
// ============================================================================

/// Decoded values of one meter and cycle
pub mod reading;

/// Physical plausibility bounds
pub mod validator;

/// Loop pacing
pub mod timing;

/// Dual-cadence poll loop
pub mod scheduler;

/// Restart policy around the poll loop
pub mod supervisor;

/// Ingestion endpoint client
pub mod ingest;

/// Ingestion liveness probe
pub mod health;

/// Settings and parameter catalog
pub mod config;

/// Log subscriber setup and frame dumps
pub mod logging;

/// Process stop signals
pub mod shutdown;

#[cfg(test)]
pub(crate) mod test_support;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Error handling ===
pub use error::{MeterError, MeterResult};

// === Wire protocol ===
pub use codec::{decode_frame, decode_read_response, encode_read_request, MbapHeader, ReadRequest};
pub use pdu::{ModbusPdu, PduBuilder};
pub use session::{RegisterTransport, SessionConfig, SessionState, SessionStats, TcpSession};

// === Decoding and planning ===
pub use byte_order::BytePermutation;
pub use parameter::{Cadence, Parameter, ParameterSpec};
pub use planner::{filter_groups, GroupMember, RegisterGroup, RegisterPlanner, DEFAULT_MAX_GAP};
pub use reader::{decode_group, DeviceRead, DeviceReader, GroupRead};
pub use retry::{Attempts, RetryPolicy};
pub use value::{decode_raw, decode_value, round3, DataType, RegisterValue};

// === Acquisition loop ===
pub use config::{AppConfig, ConfigOverrides, DeviceConfig, DeviceModel, MeterEntry, ModelCatalog, Settings};
pub use health::{health_check_worker, HealthCheckConfig};
pub use ingest::{HttpIngestClient, IngestConfig, Ingestion};
pub use reading::{Reading, ReadingValues};
pub use scheduler::{minute_floor, CycleReport, MeterContext, PollScheduler};
pub use supervisor::{Supervisor, SupervisorPolicy};
pub use timing::PollTiming;
pub use validator::{Bounds, Validator};

// === Ambient ===
pub use logging::{init_logging, HexDump};
pub use shutdown::{wait_for_shutdown, ShutdownSignal};

// === Protocol limits (commonly needed constants) ===
pub use constants::{DEFAULT_TCP_PORT, MAX_PDU_SIZE, MAX_READ_REGISTERS};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Voltage Meter Logger v{} - Modbus TCP meter acquisition", VERSION)
}

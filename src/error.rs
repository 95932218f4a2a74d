//! Error types for the acquisition pipeline
//!
//! One enum covers the whole pipeline so that the scheduler can decide,
//! per error, whether the gateway session must be torn down, whether only
//! a single parameter or reading is affected, or whether the process has to
//! stop.

use std::io;

use thiserror::Error;

use crate::constants::exception_description;
use crate::parameter::Parameter;

/// Result alias used throughout the crate
pub type MeterResult<T> = Result<T, MeterError>;

/// Acquisition pipeline errors
#[derive(Error, Debug)]
pub enum MeterError {
    /// TCP connect/send/receive failure
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Read attempted while the session is disconnected
    #[error("Not connected")]
    NotConnected,

    /// No response within the deadline
    #[error("Timeout: {operation} after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Malformed or miscorrelated frame
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Device answered with a Modbus exception
    #[error("Modbus exception: function=0x{function:02X}, code=0x{code:02X} ({message})")]
    Exception {
        function: u8,
        code: u8,
        message: String,
    },

    /// Raw register bytes could not be turned into a value
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// Decoded value outside its physical bounds
    #[error("Validation error: {parameter}={value:.2} out of range [{min}, {max}]")]
    Validation {
        parameter: Parameter,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Ingestion endpoint unreachable or rejected the payload
    #[error("Delivery error: {message}")]
    Delivery { message: String },

    /// Missing or malformed configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Raw socket error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Broken internal invariant
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// The supervised poll loop failed too many times in a row
    #[error("Too many errors: {failures} consecutive failures (limit {limit})")]
    FailureThreshold { failures: u32, limit: u32 },
}

impl MeterError {
    pub fn connection(message: impl Into<String>) -> Self {
        MeterError::Connection {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        MeterError::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn frame(message: impl Into<String>) -> Self {
        MeterError::Frame {
            message: message.into(),
        }
    }

    pub fn exception(function: u8, code: u8) -> Self {
        MeterError::Exception {
            function,
            code,
            message: exception_description(code).to_string(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        MeterError::Decode {
            message: message.into(),
        }
    }

    pub fn delivery(message: impl Into<String>) -> Self {
        MeterError::Delivery {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        MeterError::Configuration {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        MeterError::Internal {
            message: message.into(),
        }
    }

    /// Whether the gateway socket must be closed after this error.
    ///
    /// A session that timed out or lost framing can deliver a late reply
    /// that would be matched against the next request, so it is never reused.
    /// An exception response is a complete, correlated frame and leaves the
    /// stream in sync.
    pub fn closes_session(&self) -> bool {
        matches!(
            self,
            MeterError::Connection { .. }
                | MeterError::NotConnected
                | MeterError::Timeout { .. }
                | MeterError::Frame { .. }
                | MeterError::Io(_)
        )
    }

    /// Errors the poll loop cannot recover from by reconnecting
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MeterError::Configuration { .. }
                | MeterError::Internal { .. }
                | MeterError::FailureThreshold { .. }
        )
    }
}

impl From<serde_json::Error> for MeterError {
    fn from(err: serde_json::Error) -> Self {
        MeterError::configuration(format!("JSON error: {}", err))
    }
}

impl From<figment::Error> for MeterError {
    fn from(err: figment::Error) -> Self {
        MeterError::configuration(err.to_string())
    }
}

impl From<reqwest::Error> for MeterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            MeterError::delivery(format!("request timed out: {}", err))
        } else {
            MeterError::delivery(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_closing_classification() {
        assert!(MeterError::timeout("read header", 500).closes_session());
        assert!(MeterError::frame("transaction id mismatch").closes_session());
        assert!(MeterError::connection("reset").closes_session());
        assert!(MeterError::NotConnected.closes_session());
        assert!(MeterError::from(io::Error::from(io::ErrorKind::BrokenPipe)).closes_session());

        assert!(!MeterError::exception(0x03, 0x02).closes_session());
        assert!(!MeterError::decode("empty span").closes_session());
        assert!(!MeterError::delivery("502").closes_session());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(MeterError::configuration("missing meterlist").is_fatal());
        assert!(MeterError::FailureThreshold {
            failures: 11,
            limit: 10
        }
        .is_fatal());
        assert!(!MeterError::timeout("connect", 500).is_fatal());
    }

    #[test]
    fn test_display_messages() {
        let err = MeterError::exception(0x03, 0x02);
        assert_eq!(
            err.to_string(),
            "Modbus exception: function=0x03, code=0x02 (Illegal data address)"
        );

        let err = MeterError::Validation {
            parameter: Parameter::Voltage,
            value: 350.0,
            min: 100.0,
            max: 300.0,
        };
        assert_eq!(
            err.to_string(),
            "Validation error: Voltage=350.00 out of range [100, 300]"
        );
    }

    #[test]
    fn test_json_error_is_configuration() {
        let err: MeterError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, MeterError::Configuration { .. }));
    }
}

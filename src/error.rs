//! Custom error types for the application.
//!
//! This module defines the two primary error types used throughout the crate:
//!
//! - **`ScpiError`**: Protocol-level failures seen while talking to a single
//!   instrument. This covers transport I/O, response timeouts, malformed
//!   replies, and entries drained from the instrument's own error queue
//!   (`SYST:ERR?`). Drivers surface these through the session layer.
//! - **`BenchError`**: The application-level error type. It consolidates
//!   configuration problems (both parse failures from `figment` and semantic
//!   validation failures), registry lookups, measurement-data shape errors,
//!   scripting failures, and `ScpiError` via `#[from]`.
//!
//! Driver implementations of the capability traits return `anyhow::Result`,
//! which keeps per-instrument error context cheap to attach; those errors are
//! folded into `BenchError::Driver` at the bench boundary. By using `#[from]`
//! conversions, the `?` operator moves errors upward without boilerplate.

use std::time::Duration;

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type BenchResult<T> = std::result::Result<T, BenchError>;

/// One entry from an instrument's error queue, as reported by `SYST:ERR?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceError {
    /// Negative codes are SCPI-defined errors; positive codes are
    /// device-specific.
    pub code: i32,
    /// Message text with the surrounding quotes stripped.
    pub message: String,
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

fn join_device_errors(errors: &[DeviceError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Protocol-level errors from SCPI instrument communication.
#[derive(Error, Debug)]
pub enum ScpiError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No response within {waited:?}")]
    Timeout { waited: Duration },

    #[error("Connection closed by instrument")]
    Disconnected,

    #[error("Malformed response {response:?}: {reason}")]
    Parse { response: String, reason: String },

    #[error("Command {0:?} contains a line terminator")]
    InvalidCommand(String),

    #[error("Instrument error queue: {}", join_device_errors(.0))]
    Device(Vec<DeviceError>),
}

impl ScpiError {
    /// Builds a `Parse` error, truncating over-long responses so log lines
    /// stay readable.
    pub fn parse(response: impl AsRef<str>, reason: impl Into<String>) -> Self {
        let response = response.as_ref();
        let mut snippet: String = response.chars().take(128).collect();
        if snippet.len() < response.len() {
            snippet.push_str("...");
        }
        ScpiError::Parse {
            response: snippet,
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SCPI error: {0}")]
    Scpi(#[from] ScpiError),

    #[error("Instrument driver error: {0}")]
    Driver(#[from] anyhow::Error),

    #[error("Invalid resource string: {0}")]
    Resource(String),

    #[error("Invalid sweep plan: {0}")]
    InvalidSweep(String),

    #[error("Measurement data error: {0}")]
    Measurement(String),

    #[error("No instrument registered with id '{0}'")]
    UnknownInstrument(String),

    #[error("Instrument '{id}' does not provide the {capability} capability")]
    CapabilityNotSupported { id: String, capability: String },

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Shutdown finished with {} failure(s)", .0.len())]
    ShutdownFailed(Vec<BenchError>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_error_display_includes_code_and_text() {
        let err = DeviceError {
            code: -113,
            message: "Undefined header".into(),
        };
        assert_eq!(err.to_string(), "-113: Undefined header");
    }

    #[test]
    fn device_queue_errors_are_joined() {
        let err = ScpiError::Device(vec![
            DeviceError {
                code: -113,
                message: "Undefined header".into(),
            },
            DeviceError {
                code: -222,
                message: "Data out of range".into(),
            },
        ]);
        let text = err.to_string();
        assert!(text.contains("-113: Undefined header"));
        assert!(text.contains("-222: Data out of range"));
    }

    #[test]
    fn parse_error_truncates_long_responses() {
        let long = "x".repeat(500);
        match ScpiError::parse(&long, "not a float") {
            ScpiError::Parse { response, .. } => {
                assert!(response.len() < 140);
                assert!(response.ends_with("..."));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn scpi_error_converts_into_bench_error() {
        let scpi = ScpiError::Timeout {
            waited: Duration::from_secs(5),
        };
        let bench: BenchError = scpi.into();
        assert!(bench.to_string().contains("5s"));
    }
}

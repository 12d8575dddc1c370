//! Command/response session over a single instrument transport.
//!
//! `ScpiSession` serializes all traffic through an async mutex, applies the
//! configured response timeout to every transport operation, and provides
//! typed query helpers plus the IEEE 488.2 common-command surface drivers
//! build on. Drivers hold one session per physical instrument and call it
//! through `&self`, so capability objects stay `Send + Sync` without extra
//! locking of their own.

use std::future::Future;
use std::io;
use std::time::Duration;

use bytes::Bytes;
use num_complex::Complex64;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::error::{BenchResult, DeviceError, ScpiError};
use crate::scpi::response::{self, Identity};
use crate::visa::{self, ResourceAddr, Transport};

/// Floor for binary block reads. Screen images and long traces move more
/// bytes than a command round trip, so short session timeouts do not apply
/// to them.
const BLOCK_TIMEOUT_FLOOR: Duration = Duration::from_secs(30);

/// Upper bound on `SYST:ERR?` reads in one drain, in case an instrument
/// keeps inventing errors faster than we clear them.
const MAX_ERROR_DRAIN: usize = 64;

/// Appends the command terminator. Embedded terminators are rejected since
/// they would desynchronize the request/response pairing.
fn terminated(command: &str) -> Result<Vec<u8>, ScpiError> {
    if command.contains(['\r', '\n']) {
        return Err(ScpiError::InvalidCommand(command.to_string()));
    }
    let mut payload = Vec::with_capacity(command.len() + 1);
    payload.extend_from_slice(command.as_bytes());
    payload.push(b'\n');
    Ok(payload)
}

/// An open SCPI connection to one instrument.
pub struct ScpiSession {
    transport: Mutex<Box<dyn Transport>>,
    timeout: Duration,
    target: String,
}

impl ScpiSession {
    /// Connects to `addr` and wraps the transport in a session.
    pub async fn connect(addr: &ResourceAddr, timeout: Duration) -> BenchResult<Self> {
        let transport = visa::connect(addr, timeout).await?;
        Ok(Self::over(transport, timeout, addr.to_string()))
    }

    /// Builds a session over an existing transport. Used with
    /// [`crate::visa::MockTransport`] in tests.
    pub fn over(transport: Box<dyn Transport>, timeout: Duration, target: impl Into<String>) -> Self {
        Self {
            transport: Mutex::new(transport),
            timeout,
            target: target.into(),
        }
    }

    /// The resource string or endpoint this session talks to.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The per-operation response timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn timed_with<T>(
        &self,
        limit: Duration,
        op: impl Future<Output = io::Result<T>>,
    ) -> Result<T, ScpiError> {
        match tokio::time::timeout(limit, op).await {
            Err(_) => Err(ScpiError::Timeout { waited: limit }),
            Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => Err(ScpiError::Disconnected),
            Ok(Err(e)) => Err(ScpiError::Io(e)),
            Ok(Ok(value)) => Ok(value),
        }
    }

    async fn timed<T>(&self, op: impl Future<Output = io::Result<T>>) -> Result<T, ScpiError> {
        self.timed_with(self.timeout, op).await
    }

    /// Sends a command that produces no response.
    pub async fn write(&self, command: &str) -> Result<(), ScpiError> {
        trace!(instrument = %self.target, command, "scpi write");
        let payload = terminated(command)?;
        let mut transport = self.transport.lock().await;
        self.timed(transport.send(&payload)).await
    }

    /// Sends a query and returns the response line, trimmed.
    pub async fn query(&self, command: &str) -> Result<String, ScpiError> {
        trace!(instrument = %self.target, command, "scpi query");
        let payload = terminated(command)?;
        let mut transport = self.transport.lock().await;
        self.timed(transport.send(&payload)).await?;
        let line = self.timed(transport.receive_line()).await?;
        Ok(String::from_utf8_lossy(&line).trim().to_string())
    }

    /// Queries a single numeric value.
    pub async fn query_f64(&self, command: &str) -> Result<f64, ScpiError> {
        let line = self.query(command).await?;
        response::parse_f64(&line)
    }

    /// Queries a boolean (`0`/`1`/`ON`/`OFF`).
    pub async fn query_bool(&self, command: &str) -> Result<bool, ScpiError> {
        let line = self.query(command).await?;
        response::parse_bool(&line)
    }

    /// Queries a comma-separated list of numbers.
    pub async fn query_floats(&self, command: &str) -> Result<Vec<f64>, ScpiError> {
        let line = self.query(command).await?;
        response::parse_float_list(&line)
    }

    /// Queries interleaved `re,im` data as complex values.
    pub async fn query_complex(&self, command: &str) -> Result<Vec<Complex64>, ScpiError> {
        let line = self.query(command).await?;
        response::parse_complex_list(&line)
    }

    /// Sends a query whose reply is an IEEE 488.2 definite-length block and
    /// returns the payload. The response terminator following the block is
    /// consumed as well.
    ///
    /// An indefinite-length block (`#0`) is read to the end of the response
    /// line.
    pub async fn query_binary(&self, command: &str) -> Result<Bytes, ScpiError> {
        trace!(instrument = %self.target, command, "scpi binary query");
        let limit = self.timeout.max(BLOCK_TIMEOUT_FLOOR);
        let payload = terminated(command)?;
        let mut transport = self.transport.lock().await;
        self.timed(transport.send(&payload)).await?;

        let lead = self.timed(transport.receive_byte()).await?;
        if lead != b'#' {
            let rest = self.timed(transport.receive_line()).await.unwrap_or_default();
            let text = format!("{}{}", lead as char, String::from_utf8_lossy(&rest));
            return Err(ScpiError::parse(text, "expected '#' block header"));
        }
        let digit = self.timed(transport.receive_byte()).await?;
        if digit == b'0' {
            let rest = self.timed_with(limit, transport.receive_line()).await?;
            return Ok(rest);
        }
        if !digit.is_ascii_digit() {
            return Err(ScpiError::parse(
                (digit as char).to_string(),
                "bad block length digit",
            ));
        }
        let len_field = self
            .timed(transport.receive_exact((digit - b'0') as usize))
            .await?;
        let len: usize = std::str::from_utf8(&len_field)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                ScpiError::parse(String::from_utf8_lossy(&len_field), "non-numeric block length")
            })?;
        let payload = self.timed_with(limit, transport.receive_exact(len)).await?;
        self.timed(transport.receive_line()).await?;
        Ok(payload)
    }

    /// Queries `*IDN?` and parses the identity fields.
    pub async fn identify(&self) -> Result<Identity, ScpiError> {
        let line = self.query("*IDN?").await?;
        if line.is_empty() {
            return Err(ScpiError::parse(line, "empty identity response"));
        }
        let identity = Identity::parse(&line);
        debug!(instrument = %self.target, identity = %identity, "instrument identified");
        Ok(identity)
    }

    /// Issues `*RST` (instrument preset to a defined state).
    pub async fn reset(&self) -> Result<(), ScpiError> {
        self.write("*RST").await
    }

    /// Issues `*CLS` (clear status and error queue).
    pub async fn clear_status(&self) -> Result<(), ScpiError> {
        self.write("*CLS").await
    }

    /// Blocks until all pending operations complete, via `*OPC?`.
    ///
    /// The reply value is not interesting, only that it arrived; the session
    /// timeout bounds the wait.
    pub async fn wait_complete(&self) -> Result<(), ScpiError> {
        let line = self.query("*OPC?").await?;
        response::parse_f64(&line)?;
        Ok(())
    }

    /// Reads the instrument error queue until `0,"No error"` and returns
    /// the entries, oldest first.
    pub async fn drain_errors(&self) -> Result<Vec<DeviceError>, ScpiError> {
        let mut errors = Vec::new();
        for _ in 0..MAX_ERROR_DRAIN {
            let line = self.query("SYST:ERR?").await?;
            let entry = response::parse_error_line(&line)?;
            if entry.code == 0 {
                return Ok(errors);
            }
            errors.push(entry);
        }
        warn!(
            instrument = %self.target,
            limit = MAX_ERROR_DRAIN,
            "error queue did not drain"
        );
        Ok(errors)
    }

    /// Drains the error queue and fails if it was not empty. `context` names
    /// the operation being checked, for the log.
    pub async fn check_errors(&self, context: &str) -> Result<(), ScpiError> {
        let errors = self.drain_errors().await?;
        if errors.is_empty() {
            return Ok(());
        }
        warn!(
            instrument = %self.target,
            context,
            count = errors.len(),
            "instrument reported errors"
        );
        Err(ScpiError::Device(errors))
    }
}

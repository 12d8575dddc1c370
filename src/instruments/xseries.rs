//! # Keysight X-Series Signal Analyzer
//!
//! Driver for the X-Series spectrum/signal analyzers (N9000B CXA through
//! N9040B UXA) over raw SCPI.
//!
//! ## Protocol
//!
//! Representative commands:
//!
//! - `FREQ:CENT`, `FREQ:SPAN` - tuning
//! - `BAND:RES`, `BAND:VID` - resolution and video bandwidth
//! - `DISP:WIND:TRAC:Y:RLEV` - reference level
//! - `INIT:CONT OFF`, `INIT:IMM` + `*OPC?` - single-sweep handshake
//! - `FORM:TRAC:DATA ASC`, `TRAC? TRACE1` - trace readout in dBm
//! - `CALC:MARK1:MAX`, `CALC:MARK1:X?/Y?` - hardware peak search
//!
//! [`SpectrumSweep::acquire`] leaves the analyzer in single-sweep mode; call
//! [`XSeriesSa::continuous`] to hand the front panel back to an operator.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use crate::instruments::capabilities::SpectrumSweep;
use crate::measurement::{linspace, ScalarTrace};
use crate::scpi::response::Identity;
use crate::scpi::ScpiSession;
use crate::visa::ResourceAddr;

/// Keysight X-Series spectrum analyzer driver.
pub struct XSeriesSa {
    session: ScpiSession,
    identity: Option<Identity>,
}

impl XSeriesSa {
    /// Connects, clears status, and identifies the instrument.
    pub async fn connect(addr: &ResourceAddr, timeout: Duration) -> Result<Self> {
        let session = ScpiSession::connect(addr, timeout)
            .await
            .with_context(|| format!("connecting to X-Series analyzer at {addr}"))?;
        session.clear_status().await?;
        let identity = session.identify().await?;
        info!(instrument = %session.target(), identity = %identity, "X-Series analyzer connected");
        let mut sa = Self::over(session);
        sa.identity = Some(identity);
        Ok(sa)
    }

    /// Wraps an existing session without touching the instrument.
    pub fn over(session: ScpiSession) -> Self {
        Self {
            session,
            identity: None,
        }
    }

    /// Identity captured at connect time, if any.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Sets the video bandwidth in Hz.
    pub async fn set_video_bandwidth(&self, hz: f64) -> Result<()> {
        self.session.write(&format!("BAND:VID {hz}")).await?;
        self.session.check_errors("set video bandwidth").await?;
        Ok(())
    }

    /// Restores (or suspends) continuous sweeping.
    pub async fn continuous(&self, on: bool) -> Result<()> {
        let state = if on { "ON" } else { "OFF" };
        self.session.write(&format!("INIT:CONT {state}")).await?;
        Ok(())
    }
}

#[async_trait]
impl SpectrumSweep for XSeriesSa {
    async fn configure_span(&self, center_hz: f64, span_hz: f64) -> Result<()> {
        self.session
            .write(&format!("FREQ:CENT {center_hz}"))
            .await?;
        self.session.write(&format!("FREQ:SPAN {span_hz}")).await?;
        self.session.check_errors("configure span").await?;
        Ok(())
    }

    async fn set_resolution_bandwidth(&self, hz: f64) -> Result<()> {
        self.session.write(&format!("BAND:RES {hz}")).await?;
        self.session
            .check_errors("set resolution bandwidth")
            .await?;
        Ok(())
    }

    async fn set_reference_level(&self, dbm: f64) -> Result<()> {
        self.session
            .write(&format!("DISP:WIND:TRAC:Y:RLEV {dbm}"))
            .await?;
        self.session.check_errors("set reference level").await?;
        Ok(())
    }

    async fn acquire(&self) -> Result<ScalarTrace> {
        self.continuous(false).await?;
        self.session.write("INIT:IMM").await?;
        self.session.wait_complete().await?;
        self.session.write("FORM:TRAC:DATA ASC").await?;
        let values = self.session.query_floats("TRAC? TRACE1").await?;
        if values.is_empty() {
            anyhow::bail!("analyzer returned an empty trace");
        }
        let start_hz = self.session.query_f64("FREQ:STAR?").await?;
        let stop_hz = self.session.query_f64("FREQ:STOP?").await?;
        let grid = linspace(start_hz, stop_hz, values.len());
        Ok(ScalarTrace::new(grid, values)?)
    }

    async fn peak(&self) -> Result<(f64, f64)> {
        self.session.write("CALC:MARK1:MAX").await?;
        let x = self.session.query_f64("CALC:MARK1:X?").await?;
        let y = self.session.query_f64("CALC:MARK1:Y?").await?;
        Ok((x, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visa::MockTransport;

    fn analyzer(mock: MockTransport) -> XSeriesSa {
        XSeriesSa::over(ScpiSession::over(
            Box::new(mock),
            Duration::from_millis(200),
            "mock-sa",
        ))
    }

    const NO_ERROR: &str = "+0,\"No error\"";

    #[tokio::test]
    async fn configure_span_tunes_center_and_span() {
        let mock = MockTransport::new()
            .expect("FREQ:CENT 2450000000")
            .expect("FREQ:SPAN 100000000")
            .expect_reply("SYST:ERR?", NO_ERROR);
        let probe = mock.clone();
        analyzer(mock).configure_span(2.45e9, 100.0e6).await.unwrap();
        assert!(probe.finished());
    }

    #[tokio::test]
    async fn acquire_runs_single_sweep_and_builds_grid() {
        let mock = MockTransport::new()
            .expect("INIT:CONT OFF")
            .expect("INIT:IMM")
            .expect_reply("*OPC?", "1")
            .expect("FORM:TRAC:DATA ASC")
            .expect_reply("TRAC? TRACE1", "-60.1,-58.2,-20.0,-59.9,-60.3")
            .expect_reply("FREQ:STAR?", "+2.40000000E+09")
            .expect_reply("FREQ:STOP?", "+2.50000000E+09");
        let probe = mock.clone();
        let sa = analyzer(mock);
        let trace = sa.acquire().await.unwrap();
        assert!(probe.finished());
        assert_eq!(trace.len(), 5);
        assert_eq!(trace.frequencies_hz()[0], 2.4e9);
        assert_eq!(trace.frequencies_hz()[4], 2.5e9);
        assert_eq!(trace.peak(), (2.45e9, -20.0));
    }

    #[tokio::test]
    async fn peak_uses_hardware_marker() {
        let mock = MockTransport::new()
            .expect("CALC:MARK1:MAX")
            .expect_reply("CALC:MARK1:X?", "+2.45100000E+09")
            .expect_reply("CALC:MARK1:Y?", "-17.35");
        let (x, y) = analyzer(mock).peak().await.unwrap();
        assert_eq!(x, 2.451e9);
        assert_eq!(y, -17.35);
    }

    #[tokio::test]
    async fn empty_trace_is_an_error() {
        let mock = MockTransport::new()
            .expect("INIT:CONT OFF")
            .expect("INIT:IMM")
            .expect_reply("*OPC?", "1")
            .expect("FORM:TRAC:DATA ASC")
            .expect_reply("TRAC? TRACE1", "");
        let err = analyzer(mock).acquire().await.unwrap_err();
        assert!(err.to_string().contains("empty trace"));
    }
}

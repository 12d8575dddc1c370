//! # Keysight PNA-X Vector Network Analyzer
//!
//! Driver for the Keysight PNA/PNA-X family (N524x and relatives) over raw
//! SCPI. Measurements are named: create one with
//! [`NetworkAnalyzer::define_measurement`], then sweep and read it back by
//! name.
//!
//! ## Protocol
//!
//! Representative commands:
//!
//! - `SYST:FPReset` - full preset, deletes all measurements and windows
//! - `DISP:WIND1:STATE ON` - bring window 1 back after a preset
//! - `CALC:PAR:DEF '<name>',<param>` / `CALC:PAR:DEL:ALL` - measurement
//!   lifecycle
//! - `DISP:WIND:TRAC<n>:FEED '<name>'` - show a measurement on the display
//! - `SENS:FREQ:STAR|STOP|CENT|SPAN|CW`, `SENS:SWE:POIN` - stimulus setup
//! - `SOUR:POW1`, `OUTP` - port power and RF output
//! - `INIT:IMM` + `*OPC?` - single sweep with completion handshake
//! - `CALC:DATA? SDATA` - complex trace readout, interleaved re/im
//! - `CALC<t>:MARK<m>:...` - marker state, peak search, readout
//! - `MMEM:STOR:IMAG`, `MMEM:CAT?`, `MMEM:TRAN?`, `MMEM:DEL` - screen capture
//!
//! The sweep grid is not read back point-by-point; the driver reconstructs it
//! from the configured plan (or queries start/stop/points when none was set
//! through this driver).

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::instruments::capabilities::NetworkAnalyzer;
use crate::measurement::{ComplexTrace, MarkerReading, SParameter, SweepPlan};
use crate::scpi::response::{floats_to_complex, Identity};
use crate::scpi::{response, ScpiSession};
use crate::visa::ResourceAddr;

/// Highest marker number [`NetworkAnalyzer::read_markers`] checks. The
/// PNA-X has markers 1 through 10 per trace.
const MAX_MARKERS: u8 = 10;

/// Trace data encoding used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataFormat {
    /// `FORM:DATA ASC,0` - readable, adequate up to a few thousand points.
    #[default]
    Ascii,
    /// `FORM:DATA REAL,64` little-endian blocks, for long sweeps.
    Real64,
}

/// Keysight PNA-X driver.
pub struct PnaX {
    session: ScpiSession,
    identity: Option<Identity>,
    data_format: DataFormat,
    /// Instrument-side directory for temporary screen captures.
    screenshot_dir: String,
    /// Sweep applied through this driver, used to rebuild the stimulus grid.
    plan: Mutex<Option<SweepPlan>>,
    /// Next free display trace number for `DISP:WIND:TRAC<n>:FEED`.
    next_display_trace: Mutex<u8>,
}

impl PnaX {
    /// Connects, clears status, and identifies the instrument.
    pub async fn connect(addr: &ResourceAddr, timeout: Duration) -> Result<Self> {
        let session = ScpiSession::connect(addr, timeout)
            .await
            .with_context(|| format!("connecting to PNA-X at {addr}"))?;
        session.clear_status().await?;
        let identity = session.identify().await?;
        info!(instrument = %session.target(), identity = %identity, "PNA-X connected");
        let mut vna = Self::over(session);
        vna.identity = Some(identity);
        Ok(vna)
    }

    /// Wraps an existing session without touching the instrument. Used with
    /// mock transports in tests.
    pub fn over(session: ScpiSession) -> Self {
        Self {
            session,
            identity: None,
            data_format: DataFormat::default(),
            screenshot_dir: "C:/Temp".to_string(),
            plan: Mutex::new(None),
            next_display_trace: Mutex::new(1),
        }
    }

    /// Selects the trace readout encoding.
    pub fn with_data_format(mut self, format: DataFormat) -> Self {
        self.data_format = format;
        self
    }

    /// Overrides the instrument-side directory used for screen captures.
    pub fn with_screenshot_dir(mut self, dir: impl Into<String>) -> Self {
        self.screenshot_dir = dir.into();
        self
    }

    /// Identity captured at connect time, if any.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    fn cached_plan(&self) -> Option<SweepPlan> {
        *self.plan.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cache_plan(&self, plan: SweepPlan) {
        *self.plan.lock().unwrap_or_else(PoisonError::into_inner) = Some(plan);
    }

    fn take_display_trace(&self) -> u8 {
        let mut next = self
            .next_display_trace
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let trace = *next;
        *next = next.saturating_add(1);
        trace
    }

    fn reset_display_traces(&self) {
        *self
            .next_display_trace
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = 1;
    }

    /// Sets a start/stop stimulus range without changing the point count.
    pub async fn set_frequency_range(&self, start_hz: f64, stop_hz: f64) -> Result<()> {
        self.session
            .write(&format!("SENS:FREQ:STAR {start_hz}"))
            .await?;
        self.session
            .write(&format!("SENS:FREQ:STOP {stop_hz}"))
            .await?;
        self.session.check_errors("set frequency range").await?;
        Ok(())
    }

    /// Sets a center/span stimulus range without changing the point count.
    pub async fn set_center_span(&self, center_hz: f64, span_hz: f64) -> Result<()> {
        self.session
            .write(&format!("SENS:FREQ:CENT {center_hz}"))
            .await?;
        self.session
            .write(&format!("SENS:FREQ:SPAN {span_hz}"))
            .await?;
        self.session.check_errors("set center/span").await?;
        Ok(())
    }

    /// Parks the stimulus at a single CW frequency.
    pub async fn set_cw(&self, hz: f64) -> Result<()> {
        self.session.write(&format!("SENS:FREQ:CW {hz}")).await?;
        self.session.check_errors("set CW frequency").await?;
        Ok(())
    }

    /// Reads the active stimulus range and point count off the instrument.
    pub async fn sweep_bounds(&self) -> Result<SweepPlan> {
        let start_hz = self.session.query_f64("SENS:FREQ:STAR?").await?;
        let stop_hz = self.session.query_f64("SENS:FREQ:STOP?").await?;
        let points = self.session.query_f64("SENS:SWE:POIN?").await? as usize;
        Ok(SweepPlan::new(start_hz, stop_hz, points)?)
    }

    /// Triggers one sweep and blocks until the instrument reports done.
    pub async fn trigger_and_wait(&self) -> Result<()> {
        self.session.write("INIT:IMM").await?;
        self.session.wait_complete().await?;
        Ok(())
    }

    async fn read_trace_values(&self) -> Result<Vec<num_complex::Complex64>> {
        match self.data_format {
            DataFormat::Ascii => {
                self.session.write("FORM:DATA ASC,0").await?;
                Ok(self.session.query_complex("CALC:DATA? SDATA").await?)
            }
            DataFormat::Real64 => {
                self.session.write("FORM:DATA REAL,64").await?;
                self.session.write("FORM:BORD SWAP").await?;
                let payload = self.session.query_binary("CALC:DATA? SDATA").await?;
                let floats = response::decode_f64_le(&payload)?;
                Ok(floats_to_complex(&floats)?)
            }
        }
    }

    async fn stimulus_grid(&self, points: usize) -> Result<Vec<f64>> {
        let plan = match self.cached_plan() {
            Some(plan) => plan,
            None => {
                let plan = self.sweep_bounds().await?;
                debug!(
                    start_hz = plan.start_hz,
                    stop_hz = plan.stop_hz,
                    points = plan.points,
                    "stimulus grid read back from instrument"
                );
                self.cache_plan(plan);
                plan
            }
        };
        if plan.points != points {
            bail!(
                "instrument returned {points} points but the sweep is configured for {}",
                plan.points
            );
        }
        Ok(plan.frequencies())
    }
}

#[async_trait]
impl NetworkAnalyzer for PnaX {
    async fn preset(&self) -> Result<()> {
        self.session.write("SYST:FPReset").await?;
        // FPReset leaves no windows at all; without window 1 every later
        // DISP:WIND:TRAC:FEED is rejected by the firmware.
        self.session.write("DISP:WIND1:STATE ON").await?;
        self.reset_display_traces();
        *self.plan.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.session.check_errors("preset").await?;
        Ok(())
    }

    async fn configure_sweep(&self, plan: &SweepPlan) -> Result<()> {
        self.session
            .write(&format!("SENS:FREQ:STAR {}", plan.start_hz))
            .await?;
        self.session
            .write(&format!("SENS:FREQ:STOP {}", plan.stop_hz))
            .await?;
        self.session
            .write(&format!("SENS:SWE:POIN {}", plan.points))
            .await?;
        self.session.check_errors("configure sweep").await?;
        self.cache_plan(*plan);
        Ok(())
    }

    async fn define_measurement(&self, name: &str, parameter: SParameter) -> Result<()> {
        self.session
            .write(&format!("CALC:PAR:DEF '{name}',{parameter}"))
            .await?;
        let display_trace = self.take_display_trace();
        self.session
            .write(&format!("DISP:WIND:TRAC{display_trace}:FEED '{name}'"))
            .await?;
        self.session
            .check_errors("define measurement")
            .await
            .with_context(|| format!("defining measurement '{name}' as {parameter}"))?;
        Ok(())
    }

    async fn clear_measurements(&self) -> Result<()> {
        self.session.write("CALC:PAR:DEL:ALL").await?;
        self.reset_display_traces();
        self.session.check_errors("clear measurements").await?;
        Ok(())
    }

    async fn set_source_power(&self, dbm: f64) -> Result<()> {
        self.session.write(&format!("SOUR:POW1 {dbm}")).await?;
        self.session.check_errors("set source power").await?;
        Ok(())
    }

    async fn set_output(&self, on: bool) -> Result<()> {
        let state = if on { "ON" } else { "OFF" };
        self.session.write(&format!("OUTP {state}")).await?;
        self.session.check_errors("set output").await?;
        Ok(())
    }

    async fn acquire(&self, name: &str) -> Result<ComplexTrace> {
        self.session
            .write(&format!("CALC:PAR:SEL '{name}'"))
            .await?;
        self.trigger_and_wait().await?;
        let values = self
            .read_trace_values()
            .await
            .with_context(|| format!("reading measurement '{name}'"))?;
        let grid = self.stimulus_grid(values.len()).await?;
        Ok(ComplexTrace::new(grid, values)?)
    }

    async fn marker_peak_search(&self, trace: u8, marker: u8) -> Result<()> {
        self.session
            .write(&format!("CALC{trace}:MARK{marker}:STAT ON"))
            .await?;
        self.session
            .write(&format!("CALC{trace}:MARK{marker}:MAX"))
            .await?;
        self.session.check_errors("marker peak search").await?;
        Ok(())
    }

    async fn marker_value(&self, trace: u8, marker: u8) -> Result<MarkerReading> {
        let x_hz = self
            .session
            .query_f64(&format!("CALC{trace}:MARK{marker}:X?"))
            .await?;
        // Y? returns "<value>,<aux>"; the second number only matters for
        // polar and Smith formats.
        let y_values = self
            .session
            .query_floats(&format!("CALC{trace}:MARK{marker}:Y?"))
            .await?;
        let y = *y_values
            .first()
            .ok_or_else(|| anyhow::anyhow!("empty marker Y response"))?;
        Ok(MarkerReading {
            trace,
            marker,
            x_hz,
            y,
        })
    }

    async fn read_markers(&self, trace: u8) -> Result<Vec<MarkerReading>> {
        let mut readings = Vec::new();
        for marker in 1..=MAX_MARKERS {
            let enabled = self
                .session
                .query_bool(&format!("CALC{trace}:MARK{marker}:STAT?"))
                .await?;
            if enabled {
                readings.push(self.marker_value(trace, marker).await?);
            }
        }
        Ok(readings)
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        let file = "rf_bench_capture.png";
        let path = format!("{}/{}", self.screenshot_dir, file);
        self.session
            .write(&format!("MMEM:STOR:IMAG '{path}'"))
            .await?;
        self.session.wait_complete().await?;
        let catalog = self
            .session
            .query(&format!("MMEM:CAT? '{}'", self.screenshot_dir))
            .await?;
        if !catalog.to_ascii_lowercase().contains(&file.to_ascii_lowercase()) {
            bail!("screen capture {path} did not appear in the instrument catalog");
        }
        let image = self
            .session
            .query_binary(&format!("MMEM:TRAN? '{path}'"))
            .await
            .context("transferring screen capture")?;
        // Cleanup is best-effort; a stale file on the instrument is not
        // worth failing the capture over.
        self.session.write(&format!("MMEM:DEL '{path}'")).await?;
        let leftovers = self.session.drain_errors().await?;
        if !leftovers.is_empty() {
            warn!(
                instrument = %self.session.target(),
                ?leftovers,
                "cleanup after screen capture left errors"
            );
        }
        Ok(image.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visa::MockTransport;

    fn vna(mock: MockTransport) -> PnaX {
        PnaX::over(ScpiSession::over(
            Box::new(mock),
            Duration::from_millis(200),
            "mock-pnax",
        ))
    }

    const NO_ERROR: &str = "+0,\"No error\"";

    #[tokio::test]
    async fn configure_sweep_sets_range_and_points() {
        let mock = MockTransport::new()
            .expect("SENS:FREQ:STAR 1000000000")
            .expect("SENS:FREQ:STOP 2000000000")
            .expect("SENS:SWE:POIN 201")
            .expect_reply("SYST:ERR?", NO_ERROR);
        let probe = mock.clone();
        let vna = vna(mock);
        let plan = SweepPlan::new(1.0e9, 2.0e9, 201).unwrap();
        vna.configure_sweep(&plan).await.unwrap();
        assert!(probe.finished());
    }

    #[tokio::test]
    async fn preset_recreates_window_before_any_feed() {
        let mock = MockTransport::new()
            .expect("SYST:FPReset")
            .expect("DISP:WIND1:STATE ON")
            .expect_reply("SYST:ERR?", NO_ERROR)
            .expect("CALC:PAR:DEF 'gain',S21")
            .expect("DISP:WIND:TRAC1:FEED 'gain'")
            .expect_reply("SYST:ERR?", NO_ERROR);
        let probe = mock.clone();
        let vna = vna(mock);
        vna.preset().await.unwrap();
        vna.define_measurement("gain", SParameter::S21).await.unwrap();
        assert!(probe.finished());
    }

    #[tokio::test]
    async fn define_measurement_feeds_display_traces_in_order() {
        let mock = MockTransport::new()
            .expect("CALC:PAR:DEF 'gain',S21")
            .expect("DISP:WIND:TRAC1:FEED 'gain'")
            .expect_reply("SYST:ERR?", NO_ERROR)
            .expect("CALC:PAR:DEF 'match',S11")
            .expect("DISP:WIND:TRAC2:FEED 'match'")
            .expect_reply("SYST:ERR?", NO_ERROR);
        let probe = mock.clone();
        let vna = vna(mock);
        vna.define_measurement("gain", SParameter::S21).await.unwrap();
        vna.define_measurement("match", SParameter::S11).await.unwrap();
        assert!(probe.finished());
    }

    #[tokio::test]
    async fn acquire_returns_trace_on_configured_grid() {
        let mock = MockTransport::new()
            .expect("SENS:FREQ:STAR 1000000000")
            .expect("SENS:FREQ:STOP 2000000000")
            .expect("SENS:SWE:POIN 3")
            .expect_reply("SYST:ERR?", NO_ERROR)
            .expect("CALC:PAR:SEL 'gain'")
            .expect("INIT:IMM")
            .expect_reply("*OPC?", "1")
            .expect("FORM:DATA ASC,0")
            .expect_reply("CALC:DATA? SDATA", "0.5,0.0,0.25,-0.25,0.1,0.0");
        let vna = vna(mock);
        let plan = SweepPlan::new(1.0e9, 2.0e9, 3).unwrap();
        vna.configure_sweep(&plan).await.unwrap();
        let trace = vna.acquire("gain").await.unwrap();
        assert_eq!(trace.len(), 3);
        assert_eq!(trace.frequencies_hz(), vec![1.0e9, 1.5e9, 2.0e9]);
        assert_eq!(trace.values()[1], num_complex::Complex64::new(0.25, -0.25));
    }

    #[tokio::test]
    async fn acquire_queries_bounds_when_no_plan_cached() {
        let mock = MockTransport::new()
            .expect("CALC:PAR:SEL 'gain'")
            .expect("INIT:IMM")
            .expect_reply("*OPC?", "1")
            .expect("FORM:DATA ASC,0")
            .expect_reply("CALC:DATA? SDATA", "1.0,0.0,0.5,0.0")
            .expect_reply("SENS:FREQ:STAR?", "+1.00000000E+09")
            .expect_reply("SENS:FREQ:STOP?", "+3.00000000E+09")
            .expect_reply("SENS:SWE:POIN?", "+2");
        let vna = vna(mock);
        let trace = vna.acquire("gain").await.unwrap();
        assert_eq!(trace.frequencies_hz(), vec![1.0e9, 3.0e9]);
    }

    #[tokio::test]
    async fn acquire_rejects_point_count_mismatch() {
        let mock = MockTransport::new()
            .expect("SENS:FREQ:STAR 1000000000")
            .expect("SENS:FREQ:STOP 2000000000")
            .expect("SENS:SWE:POIN 3")
            .expect_reply("SYST:ERR?", NO_ERROR)
            .expect("CALC:PAR:SEL 'gain'")
            .expect("INIT:IMM")
            .expect_reply("*OPC?", "1")
            .expect("FORM:DATA ASC,0")
            .expect_reply("CALC:DATA? SDATA", "1.0,0.0");
        let vna = vna(mock);
        let plan = SweepPlan::new(1.0e9, 2.0e9, 3).unwrap();
        vna.configure_sweep(&plan).await.unwrap();
        let err = vna.acquire("gain").await.unwrap_err();
        assert!(err.to_string().contains("1 points"));
    }

    #[tokio::test]
    async fn binary_acquire_decodes_real64_block() {
        let mut payload = Vec::new();
        for v in [0.5f64, -0.5, 0.25, 0.0] {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        let mut reply = format!("#2{:02}", payload.len()).into_bytes();
        reply.extend_from_slice(&payload);
        reply.push(b'\n');
        let mock = MockTransport::new()
            .expect("SENS:FREQ:STAR 1000000000")
            .expect("SENS:FREQ:STOP 2000000000")
            .expect("SENS:SWE:POIN 2")
            .expect_reply("SYST:ERR?", NO_ERROR)
            .expect("CALC:PAR:SEL 'gain'")
            .expect("INIT:IMM")
            .expect_reply("*OPC?", "1")
            .expect("FORM:DATA REAL,64")
            .expect("FORM:BORD SWAP")
            .expect_reply_raw("CALC:DATA? SDATA", reply);
        let vna = vna(mock).with_data_format(DataFormat::Real64);
        let plan = SweepPlan::new(1.0e9, 2.0e9, 2).unwrap();
        vna.configure_sweep(&plan).await.unwrap();
        let trace = vna.acquire("gain").await.unwrap();
        assert_eq!(trace.values()[0], num_complex::Complex64::new(0.5, -0.5));
        assert_eq!(trace.values()[1], num_complex::Complex64::new(0.25, 0.0));
    }

    #[tokio::test]
    async fn marker_value_takes_first_y_number() {
        let mock = MockTransport::new()
            .expect_reply("CALC1:MARK2:X?", "+1.50000000E+09")
            .expect_reply("CALC1:MARK2:Y?", "-3.0500000E+00,+0.0000000E+00");
        let vna = vna(mock);
        let reading = vna.marker_value(1, 2).await.unwrap();
        assert_eq!(reading.x_hz, 1.5e9);
        assert_eq!(reading.y, -3.05);
        assert_eq!(reading.marker, 2);
    }

    #[tokio::test]
    async fn read_markers_checks_markers_one_through_ten() {
        let mut mock = MockTransport::new();
        for marker in 1..=10u8 {
            let state = if marker == 3 || marker == 10 { "1" } else { "0" };
            mock = mock.expect_reply(&format!("CALC1:MARK{marker}:STAT?"), state);
            if marker == 3 {
                mock = mock
                    .expect_reply("CALC1:MARK3:X?", "+2.00000000E+09")
                    .expect_reply("CALC1:MARK3:Y?", "-10.0,0.0");
            }
            if marker == 10 {
                mock = mock
                    .expect_reply("CALC1:MARK10:X?", "+2.40000000E+09")
                    .expect_reply("CALC1:MARK10:Y?", "-32.5,0.0");
            }
        }
        let probe = mock.clone();
        let vna = vna(mock);
        let readings = vna.read_markers(1).await.unwrap();
        assert!(probe.finished(), "not every marker slot was checked");
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].marker, 3);
        assert_eq!(readings[0].x_hz, 2.0e9);
        assert_eq!(readings[1].marker, 10);
        assert_eq!(readings[1].x_hz, 2.4e9);
    }

    #[tokio::test]
    async fn screenshot_checks_catalog_and_cleans_up() {
        let png = b"\x89PNG\r\n\x1a\nfakeimage".to_vec();
        let mut block = format!("#2{:02}", png.len()).into_bytes();
        block.extend_from_slice(&png);
        block.push(b'\n');
        let mock = MockTransport::new()
            .expect("MMEM:STOR:IMAG 'C:/Temp/rf_bench_capture.png'")
            .expect_reply("*OPC?", "1")
            .expect_reply("MMEM:CAT? 'C:/Temp'", "512000,8192000,\"rf_bench_capture.png,,18\"")
            .expect_reply_raw("MMEM:TRAN? 'C:/Temp/rf_bench_capture.png'", block)
            .expect("MMEM:DEL 'C:/Temp/rf_bench_capture.png'")
            .expect_reply("SYST:ERR?", NO_ERROR);
        let probe = mock.clone();
        let vna = vna(mock);
        let image = vna.screenshot().await.unwrap();
        assert!(image.starts_with(b"\x89PNG"));
        assert!(probe.finished());
    }

    #[tokio::test]
    async fn screenshot_fails_when_file_missing_from_catalog() {
        let mock = MockTransport::new()
            .expect("MMEM:STOR:IMAG 'C:/Temp/rf_bench_capture.png'")
            .expect_reply("*OPC?", "1")
            .expect_reply("MMEM:CAT? 'C:/Temp'", "512000,8192000,\"\"");
        let vna = vna(mock);
        let err = vna.screenshot().await.unwrap_err();
        assert!(err.to_string().contains("catalog"));
    }

    #[tokio::test]
    async fn device_errors_surface_from_configuration() {
        let mock = MockTransport::new()
            .expect("SOUR:POW1 100")
            .expect_reply("SYST:ERR?", "-222,\"Data out of range\"")
            .expect_reply("SYST:ERR?", NO_ERROR);
        let vna = vna(mock);
        let err = vna.set_source_power(100.0).await.unwrap_err();
        assert!(err.to_string().contains("Data out of range"));
    }
}

//! In-memory mock instruments.
//!
//! One mock per capability trait, with just enough physics to make scripts
//! and integration tests meaningful: the mock VNA synthesizes a notch filter
//! response, the mock spectrum analyzer a single CW tone over a noise floor,
//! and the mock power sensor a lightly-noised level. All state lives behind
//! async locks so the mocks behave like the real drivers under concurrent
//! callers.
//!
//! These back the registry's `mock_*` driver kinds, so a bench config can be
//! exercised end to end with no hardware on the LAN.

use std::collections::HashMap;
use std::f64::consts::PI;

use anyhow::{bail, Result};
use async_trait::async_trait;
use num_complex::Complex64;
use rand::Rng;
use tokio::sync::RwLock;

use crate::instruments::capabilities::{NetworkAnalyzer, PowerSensor, RfSource, SpectrumSweep};
use crate::measurement::{linspace, ComplexTrace, MarkerReading, SParameter, ScalarTrace, SweepPlan};
use crate::scpi::Identity;

fn mock_identity(model: &str) -> Identity {
    Identity {
        manufacturer: "rf-bench".to_string(),
        model: model.to_string(),
        serial: "0".to_string(),
        firmware: env!("CARGO_PKG_VERSION").to_string(),
    }
}

// ---------------------------------------------------------------------------
// MockRfSource
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct SourceState {
    frequency_hz: f64,
    level_dbm: f64,
    output: bool,
}

/// Mock CW source. Remembers its setpoints, output starts off.
pub struct MockRfSource {
    state: RwLock<SourceState>,
}

impl MockRfSource {
    /// Creates a source parked at the given frequency and level.
    pub fn new(frequency_hz: f64, level_dbm: f64) -> Self {
        Self {
            state: RwLock::new(SourceState {
                frequency_hz,
                level_dbm,
                output: false,
            }),
        }
    }

    /// Fabricated identity for registry listings.
    pub fn identity(&self) -> Identity {
        mock_identity("MockSource")
    }
}

impl Default for MockRfSource {
    fn default() -> Self {
        Self::new(1.0e9, -30.0)
    }
}

#[async_trait]
impl RfSource for MockRfSource {
    async fn set_frequency(&self, hz: f64) -> Result<()> {
        if hz <= 0.0 {
            bail!("frequency must be positive, got {hz} Hz");
        }
        self.state.write().await.frequency_hz = hz;
        Ok(())
    }

    async fn frequency(&self) -> Result<f64> {
        Ok(self.state.read().await.frequency_hz)
    }

    async fn set_level_dbm(&self, dbm: f64) -> Result<()> {
        self.state.write().await.level_dbm = dbm;
        Ok(())
    }

    async fn level_dbm(&self) -> Result<f64> {
        Ok(self.state.read().await.level_dbm)
    }

    async fn set_output(&self, on: bool) -> Result<()> {
        self.state.write().await.output = on;
        Ok(())
    }

    async fn output(&self) -> Result<bool> {
        Ok(self.state.read().await.output)
    }
}

// ---------------------------------------------------------------------------
// MockPowerSensor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct SensorState {
    base_dbm: f64,
    frequency_hz: f64,
    averaging: u32,
}

/// Mock power sensor reading a fixed level with a little measurement noise.
pub struct MockPowerSensor {
    state: RwLock<SensorState>,
    noise_db: f64,
}

impl MockPowerSensor {
    /// Creates a sensor that reads around `base_dbm`.
    pub fn new(base_dbm: f64) -> Self {
        Self {
            state: RwLock::new(SensorState {
                base_dbm,
                frequency_hz: 1.0e9,
                averaging: 1,
            }),
            noise_db: 0.05,
        }
    }

    /// Moves the simulated input level, for tests that sweep power.
    pub async fn set_base_dbm(&self, dbm: f64) {
        self.state.write().await.base_dbm = dbm;
    }

    /// Fabricated identity for registry listings.
    pub fn identity(&self) -> Identity {
        mock_identity("MockPowerSensor")
    }
}

impl Default for MockPowerSensor {
    fn default() -> Self {
        Self::new(-30.0)
    }
}

#[async_trait]
impl PowerSensor for MockPowerSensor {
    async fn read_dbm(&self) -> Result<f64> {
        let base = self.state.read().await.base_dbm;
        let noise = rand::thread_rng().gen_range(-self.noise_db..=self.noise_db);
        Ok(base + noise)
    }

    async fn set_frequency(&self, hz: f64) -> Result<()> {
        if hz <= 0.0 {
            bail!("frequency must be positive, got {hz} Hz");
        }
        self.state.write().await.frequency_hz = hz;
        Ok(())
    }

    async fn zero(&self) -> Result<()> {
        Ok(())
    }

    async fn set_averaging(&self, count: u32) -> Result<()> {
        if count == 0 {
            bail!("averaging count must be at least 1");
        }
        self.state.write().await.averaging = count;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockVna
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct VnaState {
    plan: Option<SweepPlan>,
    measurements: HashMap<String, SParameter>,
    source_power_dbm: f64,
    output: bool,
    markers: HashMap<(u8, u8), MarkerReading>,
}

/// Mock VNA synthesizing the response of a notch filter.
///
/// Transmission parameters (S21/S12) show a Gaussian dip of `notch_depth_db`
/// at `notch_hz`; reflection parameters show the energy coming back at the
/// notch. Phase advances linearly with frequency as if through 1 ns of line.
pub struct MockVna {
    state: RwLock<VnaState>,
    notch_hz: f64,
    notch_width_hz: f64,
    notch_depth_db: f64,
}

impl MockVna {
    /// Creates a VNA with a notch at 1.5 GHz, 30 dB deep, 50 MHz wide.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(VnaState::default()),
            notch_hz: 1.5e9,
            notch_width_hz: 50.0e6,
            notch_depth_db: 30.0,
        }
    }

    /// Moves the simulated notch.
    pub fn with_notch(mut self, hz: f64, depth_db: f64, width_hz: f64) -> Self {
        self.notch_hz = hz;
        self.notch_depth_db = depth_db;
        self.notch_width_hz = width_hz;
        self
    }

    /// Fabricated identity for registry listings.
    pub fn identity(&self) -> Identity {
        mock_identity("MockVNA")
    }

    fn transmission_db(&self, hz: f64) -> f64 {
        let x = (hz - self.notch_hz) / self.notch_width_hz;
        let insertion_loss = 0.5;
        -insertion_loss - self.notch_depth_db * (-x * x).exp()
    }

    fn synth_value(&self, parameter: SParameter, hz: f64) -> Complex64 {
        // 1 ns of electrical length.
        let phase = -2.0 * PI * hz * 1.0e-9;
        let t_mag = 10.0_f64.powf(self.transmission_db(hz) / 20.0);
        let mag = match parameter {
            SParameter::S21 | SParameter::S12 => t_mag,
            // What does not get through comes back, minus a return-loss
            // floor away from the notch.
            SParameter::S11 | SParameter::S22 => (1.0 - t_mag * t_mag).sqrt().max(0.01),
            SParameter::Custom { .. } => t_mag,
        };
        Complex64::from_polar(mag, phase)
    }

    async fn synth_trace(&self, parameter: SParameter) -> Result<ComplexTrace> {
        let plan = match self.state.read().await.plan {
            Some(plan) => plan,
            None => bail!("no sweep configured"),
        };
        let grid = plan.frequencies();
        let values = grid
            .iter()
            .map(|hz| self.synth_value(parameter, *hz))
            .collect();
        Ok(ComplexTrace::new(grid, values)?)
    }

    async fn first_measurement(&self) -> Result<SParameter> {
        let state = self.state.read().await;
        state
            .measurements
            .values()
            .next()
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no measurement defined"))
    }
}

impl Default for MockVna {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkAnalyzer for MockVna {
    async fn preset(&self) -> Result<()> {
        *self.state.write().await = VnaState::default();
        Ok(())
    }

    async fn configure_sweep(&self, plan: &SweepPlan) -> Result<()> {
        self.state.write().await.plan = Some(*plan);
        Ok(())
    }

    async fn define_measurement(&self, name: &str, parameter: SParameter) -> Result<()> {
        let mut state = self.state.write().await;
        if state.measurements.contains_key(name) {
            bail!("measurement '{name}' already defined");
        }
        state.measurements.insert(name.to_string(), parameter);
        Ok(())
    }

    async fn clear_measurements(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.measurements.clear();
        state.markers.clear();
        Ok(())
    }

    async fn set_source_power(&self, dbm: f64) -> Result<()> {
        self.state.write().await.source_power_dbm = dbm;
        Ok(())
    }

    async fn set_output(&self, on: bool) -> Result<()> {
        self.state.write().await.output = on;
        Ok(())
    }

    async fn acquire(&self, name: &str) -> Result<ComplexTrace> {
        let parameter = {
            let state = self.state.read().await;
            match state.measurements.get(name) {
                Some(parameter) => *parameter,
                None => bail!("measurement '{name}' is not defined"),
            }
        };
        self.synth_trace(parameter).await
    }

    async fn marker_peak_search(&self, trace: u8, marker: u8) -> Result<()> {
        let parameter = self.first_measurement().await?;
        let synth = self.synth_trace(parameter).await?;
        let (x_hz, y) = synth.peak_db();
        self.state.write().await.markers.insert(
            (trace, marker),
            MarkerReading {
                trace,
                marker,
                x_hz,
                y,
            },
        );
        Ok(())
    }

    async fn marker_value(&self, trace: u8, marker: u8) -> Result<MarkerReading> {
        self.state
            .read()
            .await
            .markers
            .get(&(trace, marker))
            .copied()
            .ok_or_else(|| anyhow::anyhow!("marker {marker} on trace {trace} is not set"))
    }

    async fn read_markers(&self, trace: u8) -> Result<Vec<MarkerReading>> {
        let state = self.state.read().await;
        let mut readings: Vec<MarkerReading> = state
            .markers
            .values()
            .filter(|m| m.trace == trace)
            .copied()
            .collect();
        readings.sort_by_key(|m| m.marker);
        Ok(readings)
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        // PNG magic plus a stub payload; enough for callers that only save
        // the bytes to disk.
        let mut image = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        image.extend_from_slice(&[0u8; 64]);
        Ok(image)
    }
}

// ---------------------------------------------------------------------------
// MockSpectrum
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct SpectrumState {
    center_hz: f64,
    span_hz: f64,
    rbw_hz: f64,
    reference_dbm: f64,
}

/// Mock spectrum analyzer showing one CW tone over a noise floor.
pub struct MockSpectrum {
    state: RwLock<SpectrumState>,
    tone_hz: f64,
    tone_dbm: f64,
    points: usize,
}

impl MockSpectrum {
    /// Creates an analyzer seeing a -20 dBm tone at 1.5 GHz.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(SpectrumState {
                center_hz: 1.5e9,
                span_hz: 1.0e9,
                rbw_hz: 1.0e6,
                reference_dbm: 0.0,
            }),
            tone_hz: 1.5e9,
            tone_dbm: -20.0,
            points: 401,
        }
    }

    /// Moves the simulated tone.
    pub fn with_tone(mut self, hz: f64, dbm: f64) -> Self {
        self.tone_hz = hz;
        self.tone_dbm = dbm;
        self
    }

    /// Fabricated identity for registry listings.
    pub fn identity(&self) -> Identity {
        mock_identity("MockSpectrum")
    }
}

impl Default for MockSpectrum {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpectrumSweep for MockSpectrum {
    async fn configure_span(&self, center_hz: f64, span_hz: f64) -> Result<()> {
        if span_hz <= 0.0 {
            bail!("span must be positive, got {span_hz} Hz");
        }
        let mut state = self.state.write().await;
        state.center_hz = center_hz;
        state.span_hz = span_hz;
        Ok(())
    }

    async fn set_resolution_bandwidth(&self, hz: f64) -> Result<()> {
        if hz <= 0.0 {
            bail!("resolution bandwidth must be positive, got {hz} Hz");
        }
        self.state.write().await.rbw_hz = hz;
        Ok(())
    }

    async fn set_reference_level(&self, dbm: f64) -> Result<()> {
        self.state.write().await.reference_dbm = dbm;
        Ok(())
    }

    async fn acquire(&self) -> Result<ScalarTrace> {
        let state = *self.state.read().await;
        let start = state.center_hz - state.span_hz / 2.0;
        let stop = state.center_hz + state.span_hz / 2.0;
        let grid = linspace(start, stop, self.points);
        let mut rng = rand::thread_rng();
        // Tone width tracks the RBW like a real analyzer's displayed shape.
        let width = state.rbw_hz.max(state.span_hz / self.points as f64);
        let values = grid
            .iter()
            .map(|hz| {
                let floor: f64 = -70.0 + rng.gen_range(-1.0..=1.0);
                let x = (hz - self.tone_hz) / width;
                let tone = self.tone_dbm - 10.0 * x * x;
                floor.max(tone)
            })
            .collect();
        Ok(ScalarTrace::new(grid, values)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn source_round_trips_state() {
        let source = MockRfSource::default();
        source.set_frequency(2.45e9).await.unwrap();
        source.set_level_dbm(-7.5).await.unwrap();
        source.set_output(true).await.unwrap();
        assert_eq!(source.frequency().await.unwrap(), 2.45e9);
        assert_eq!(source.level_dbm().await.unwrap(), -7.5);
        assert!(source.output().await.unwrap());
        assert!(source.set_frequency(-1.0).await.is_err());
    }

    #[tokio::test]
    async fn sensor_reads_near_base_level() {
        let sensor = MockPowerSensor::new(-12.0);
        for _ in 0..10 {
            let reading = sensor.read_dbm().await.unwrap();
            assert!((reading + 12.0).abs() <= 0.051, "reading {reading}");
        }
        sensor.set_base_dbm(-40.0).await;
        assert!((sensor.read_dbm().await.unwrap() + 40.0).abs() <= 0.051);
    }

    #[tokio::test]
    async fn vna_requires_sweep_and_measurement() {
        let vna = MockVna::new();
        vna.define_measurement("gain", SParameter::S21).await.unwrap();
        assert!(vna.acquire("gain").await.is_err());

        let plan = SweepPlan::new(1.0e9, 2.0e9, 101).unwrap();
        vna.configure_sweep(&plan).await.unwrap();
        assert!(vna.acquire("nope").await.is_err());
        let trace = vna.acquire("gain").await.unwrap();
        assert_eq!(trace.len(), 101);
    }

    #[tokio::test]
    async fn vna_notch_shows_up_in_transmission() {
        let vna = MockVna::new();
        let plan = SweepPlan::new(1.0e9, 2.0e9, 201).unwrap();
        vna.configure_sweep(&plan).await.unwrap();
        vna.define_measurement("thru", SParameter::S21).await.unwrap();
        let trace = vna.acquire("thru").await.unwrap();
        let (notch_freq, notch_db) = trace.minimum_db();
        assert!((notch_freq - 1.5e9).abs() < 5.0e6);
        assert!(notch_db < -25.0);
        // Away from the notch the line is nearly lossless.
        let db = trace.log_magnitude_db();
        assert!(db[0] > -1.0);
    }

    #[tokio::test]
    async fn vna_rejects_duplicate_measurement_names() {
        let vna = MockVna::new();
        vna.define_measurement("gain", SParameter::S21).await.unwrap();
        assert!(vna.define_measurement("gain", SParameter::S11).await.is_err());
        vna.clear_measurements().await.unwrap();
        vna.define_measurement("gain", SParameter::S11).await.unwrap();
    }

    #[tokio::test]
    async fn vna_markers_follow_peak_search() {
        let vna = MockVna::new();
        let plan = SweepPlan::new(1.0e9, 2.0e9, 201).unwrap();
        vna.configure_sweep(&plan).await.unwrap();
        vna.define_measurement("thru", SParameter::S21).await.unwrap();
        assert!(vna.marker_value(1, 1).await.is_err());
        vna.marker_peak_search(1, 1).await.unwrap();
        let reading = vna.marker_value(1, 1).await.unwrap();
        assert!(reading.y > -1.0);
        let all = vna.read_markers(1).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn spectrum_peak_lands_on_tone() {
        let sa = MockSpectrum::new().with_tone(1.75e9, -15.0);
        sa.configure_span(1.75e9, 500.0e6).await.unwrap();
        sa.set_resolution_bandwidth(1.0e6).await.unwrap();
        let (freq, dbm) = sa.peak().await.unwrap();
        assert!((freq - 1.75e9).abs() < 2.0e6);
        assert!((dbm + 15.0).abs() < 1.5);
    }

    #[tokio::test]
    async fn screenshot_returns_png_magic() {
        let vna = MockVna::new();
        let image = vna.screenshot().await.unwrap();
        assert!(image.starts_with(b"\x89PNG"));
    }
}

//! Atomic instrument capabilities.
//!
//! This module defines fine-grained capability traits that bench instruments
//! implement. Instead of one monolithic `Instrument` trait, devices expose
//! the specific capabilities they actually support:
//!
//! - A signal generator implements: `RfSource`
//! - A power meter implements: `PowerSensor`
//! - A spectrum analyzer implements: `SpectrumSweep`
//! - A vector network analyzer implements: `NetworkAnalyzer`
//!
//! Test sequences are written against trait bounds, so the same gain-sweep
//! routine runs against an SMB100A or a mock source without modification.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Takes `&self`; implementations use interior mutability for state
//!
//! Optional operations have default implementations that bail, so callers
//! can probe support at runtime without downcasting.

use anyhow::Result;
use async_trait::async_trait;

use crate::measurement::{ComplexTrace, MarkerReading, SParameter, ScalarTrace, SweepPlan};

/// Capability: CW Signal Source
///
/// Instruments that generate a continuous-wave RF tone with settable
/// frequency, level, and output state (signal generators, the source side of
/// a VNA port when driven standalone).
///
/// # Contract
/// - Frequencies are in Hz, levels in dBm.
/// - Setters return once the instrument has accepted the value; they do not
///   wait for level settling beyond what the hardware itself does.
/// - `set_output(false)` must be safe to call at any time; shutdown paths
///   rely on it.
#[async_trait]
pub trait RfSource: Send + Sync {
    /// Set the CW frequency in Hz.
    async fn set_frequency(&self, hz: f64) -> Result<()>;

    /// Read back the CW frequency in Hz.
    async fn frequency(&self) -> Result<f64>;

    /// Set the output level in dBm.
    async fn set_level_dbm(&self, dbm: f64) -> Result<()>;

    /// Read back the output level in dBm.
    async fn level_dbm(&self) -> Result<f64>;

    /// Enable or disable the RF output.
    async fn set_output(&self, on: bool) -> Result<()>;

    /// Whether the RF output is currently on.
    async fn output(&self) -> Result<bool>;
}

/// Capability: Scalar Power Measurement
///
/// Instruments that measure absolute RF power at a point (USB/LAN power
/// sensors, power meters).
///
/// # Contract
/// - `read_dbm` triggers a fresh reading; it does not return a stale buffer.
/// - `set_frequency` selects the calibration-factor frequency, not a tuned
///   receiver frequency.
/// - Readings should complete within the sensor's configured averaging
///   window; callers treat >1 s as slow.
#[async_trait]
pub trait PowerSensor: Send + Sync {
    /// Take one power reading in dBm.
    async fn read_dbm(&self) -> Result<f64>;

    /// Set the frequency used for calibration-factor correction, in Hz.
    async fn set_frequency(&self, hz: f64) -> Result<()>;

    /// Zero the sensor. Requires the RF input to be quiet.
    ///
    /// # Default Implementation
    /// Returns an error indicating zeroing is not supported.
    async fn zero(&self) -> Result<()> {
        anyhow::bail!("Zeroing not supported by this sensor")
    }

    /// Set the averaging count for subsequent readings.
    ///
    /// # Default Implementation
    /// Returns an error indicating averaging control is not supported.
    async fn set_averaging(&self, count: u32) -> Result<()> {
        let _ = count;
        anyhow::bail!("Averaging control not supported by this sensor")
    }
}

/// Capability: Swept Spectrum Measurement
///
/// Instruments that sweep a band and report power versus frequency
/// (spectrum and signal analyzers).
///
/// # Contract
/// - `configure_span` retunes the analyzer; it does not trigger a sweep.
/// - `acquire` runs one complete single sweep and returns it; continuous
///   sweep mode is suspended for the duration.
/// - Trace values are in dBm at the analyzer input.
#[async_trait]
pub trait SpectrumSweep: Send + Sync {
    /// Tune to `center_hz` with the given span, both in Hz.
    async fn configure_span(&self, center_hz: f64, span_hz: f64) -> Result<()>;

    /// Set the resolution bandwidth in Hz.
    async fn set_resolution_bandwidth(&self, hz: f64) -> Result<()>;

    /// Set the reference level in dBm.
    ///
    /// # Default Implementation
    /// Returns an error indicating reference-level control is not supported.
    async fn set_reference_level(&self, dbm: f64) -> Result<()> {
        let _ = dbm;
        anyhow::bail!("Reference level control not supported by this analyzer")
    }

    /// Run one single sweep and return the trace.
    async fn acquire(&self) -> Result<ScalarTrace>;

    /// Frequency and power of the strongest signal in the current span.
    ///
    /// # Default Implementation
    /// Acquires a sweep and picks its maximum. Instruments with a hardware
    /// peak-search marker can override this with a cheaper query.
    async fn peak(&self) -> Result<(f64, f64)> {
        let trace = self.acquire().await?;
        Ok(trace.peak())
    }
}

/// Capability: Vector Network Analysis
///
/// Instruments that measure complex S-parameters over a stimulus sweep.
///
/// # Contract
/// - Measurements are named: `define_measurement("gain", S21)` creates a
///   named trace that `acquire("gain")` later reads. Names must be unique
///   per instrument.
/// - `configure_sweep` applies to all measurements on the active channel.
/// - `acquire` triggers a single sweep, waits for completion, and returns
///   calibrated complex data on the stimulus grid.
/// - `set_output(false)` must be safe at any time; shutdown paths rely
///   on it.
#[async_trait]
pub trait NetworkAnalyzer: Send + Sync {
    /// Full instrument preset, deleting all measurements and windows.
    async fn preset(&self) -> Result<()>;

    /// Apply a linear frequency sweep to the active channel.
    async fn configure_sweep(&self, plan: &SweepPlan) -> Result<()>;

    /// Create a named measurement of `parameter` and feed it to the display.
    async fn define_measurement(&self, name: &str, parameter: SParameter) -> Result<()>;

    /// Delete all defined measurements.
    async fn clear_measurements(&self) -> Result<()>;

    /// Set the stimulus port power in dBm.
    async fn set_source_power(&self, dbm: f64) -> Result<()>;

    /// Enable or disable the stimulus output.
    async fn set_output(&self, on: bool) -> Result<()>;

    /// Sweep once and return the named measurement's complex trace.
    async fn acquire(&self, name: &str) -> Result<ComplexTrace>;

    /// Run a peak search with the given marker. The marker is enabled if it
    /// was off.
    async fn marker_peak_search(&self, trace: u8, marker: u8) -> Result<()>;

    /// Read one marker's stimulus and response values.
    async fn marker_value(&self, trace: u8, marker: u8) -> Result<MarkerReading>;

    /// Read every enabled marker on the given trace.
    async fn read_markers(&self, trace: u8) -> Result<Vec<MarkerReading>>;

    /// Capture the instrument screen as PNG bytes.
    ///
    /// # Default Implementation
    /// Returns an error indicating screen capture is not supported.
    async fn screenshot(&self) -> Result<Vec<u8>> {
        anyhow::bail!("Screen capture not supported by this analyzer")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::linspace;

    struct FixedSource {
        frequency: std::sync::Mutex<f64>,
        output: std::sync::Mutex<bool>,
    }

    #[async_trait]
    impl RfSource for FixedSource {
        async fn set_frequency(&self, hz: f64) -> Result<()> {
            *self.frequency.lock().unwrap() = hz;
            Ok(())
        }

        async fn frequency(&self) -> Result<f64> {
            Ok(*self.frequency.lock().unwrap())
        }

        async fn set_level_dbm(&self, _dbm: f64) -> Result<()> {
            Ok(())
        }

        async fn level_dbm(&self) -> Result<f64> {
            Ok(0.0)
        }

        async fn set_output(&self, on: bool) -> Result<()> {
            *self.output.lock().unwrap() = on;
            Ok(())
        }

        async fn output(&self) -> Result<bool> {
            Ok(*self.output.lock().unwrap())
        }
    }

    #[tokio::test]
    async fn rf_source_trait_round_trips_state() {
        let source = FixedSource {
            frequency: std::sync::Mutex::new(1.0e9),
            output: std::sync::Mutex::new(false),
        };
        source.set_frequency(2.45e9).await.unwrap();
        assert_eq!(source.frequency().await.unwrap(), 2.45e9);
        source.set_output(true).await.unwrap();
        assert!(source.output().await.unwrap());
    }

    struct FlatAnalyzer;

    #[async_trait]
    impl SpectrumSweep for FlatAnalyzer {
        async fn configure_span(&self, _center_hz: f64, _span_hz: f64) -> Result<()> {
            Ok(())
        }

        async fn set_resolution_bandwidth(&self, _hz: f64) -> Result<()> {
            Ok(())
        }

        async fn acquire(&self) -> Result<ScalarTrace> {
            let grid = linspace(1.0e9, 2.0e9, 5);
            let mut values = vec![-60.0; 5];
            values[3] = -12.5;
            Ok(ScalarTrace::new(grid, values)?)
        }
    }

    #[tokio::test]
    async fn default_peak_uses_acquired_trace() {
        let analyzer = FlatAnalyzer;
        let (freq, dbm) = analyzer.peak().await.unwrap();
        assert_eq!(freq, 1.75e9);
        assert_eq!(dbm, -12.5);
    }

    #[tokio::test]
    async fn default_reference_level_is_unsupported() {
        let analyzer = FlatAnalyzer;
        assert!(analyzer.set_reference_level(0.0).await.is_err());
    }

    struct BareSensor;

    #[async_trait]
    impl PowerSensor for BareSensor {
        async fn read_dbm(&self) -> Result<f64> {
            Ok(-30.0)
        }

        async fn set_frequency(&self, _hz: f64) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn default_zero_and_averaging_are_unsupported() {
        let sensor = BareSensor;
        assert!(sensor.zero().await.is_err());
        assert!(sensor.set_averaging(16).await.is_err());
        assert_eq!(sensor.read_dbm().await.unwrap(), -30.0);
    }
}

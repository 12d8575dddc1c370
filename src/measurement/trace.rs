//! Sweep plans, traces, and marker readings.
//!
//! Traces keep raw data in natural units: complex S-parameter values for
//! vector measurements, dBm for scalar spectrum data. Derived views
//! (log magnitude, phase) are computed on demand so exporters can pick
//! whichever representation a file format wants.

use num_complex::Complex64;
use serde::Serialize;

use crate::error::{BenchError, BenchResult};

/// Magnitudes below this are clamped before the log so a perfect null does
/// not produce `-inf` dB.
const MAGNITUDE_FLOOR: f64 = 1e-20;

/// `points` evenly spaced values from `start` to `stop`, endpoints included.
pub fn linspace(start: f64, stop: f64, points: usize) -> Vec<f64> {
    match points {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (points - 1) as f64;
            (0..points).map(|i| start + step * i as f64).collect()
        }
    }
}

/// A linear frequency sweep: start, stop, and number of points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SweepPlan {
    /// First stimulus frequency in Hz.
    pub start_hz: f64,
    /// Last stimulus frequency in Hz.
    pub stop_hz: f64,
    /// Number of points, endpoints included.
    pub points: usize,
}

impl SweepPlan {
    /// Validates and builds a sweep plan.
    pub fn new(start_hz: f64, stop_hz: f64, points: usize) -> BenchResult<Self> {
        if !start_hz.is_finite() || !stop_hz.is_finite() {
            return Err(BenchError::InvalidSweep(
                "frequencies must be finite".into(),
            ));
        }
        if start_hz <= 0.0 {
            return Err(BenchError::InvalidSweep(format!(
                "start frequency must be positive, got {start_hz} Hz"
            )));
        }
        if stop_hz <= start_hz {
            return Err(BenchError::InvalidSweep(format!(
                "stop frequency ({stop_hz} Hz) must be above start ({start_hz} Hz)"
            )));
        }
        if points < 2 {
            return Err(BenchError::InvalidSweep(format!(
                "a sweep needs at least 2 points, got {points}"
            )));
        }
        Ok(Self {
            start_hz,
            stop_hz,
            points,
        })
    }

    /// The stimulus grid this plan produces.
    pub fn frequencies(&self) -> Vec<f64> {
        linspace(self.start_hz, self.stop_hz, self.points)
    }

    /// Sweep width in Hz.
    pub fn span_hz(&self) -> f64 {
        self.stop_hz - self.start_hz
    }

    /// Center frequency in Hz.
    pub fn center_hz(&self) -> f64 {
        (self.start_hz + self.stop_hz) / 2.0
    }
}

/// A scattering parameter, e.g. `S21` (port 2 response to port 1 stimulus).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SParameter {
    S11,
    S21,
    S12,
    S22,
    /// Ports beyond 2, for multiport analyzers.
    Custom {
        /// Receive port.
        output: u8,
        /// Stimulus port.
        input: u8,
    },
}

impl SParameter {
    /// The SCPI argument form, identical to the display form.
    pub fn scpi_arg(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for SParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SParameter::S11 => write!(f, "S11"),
            SParameter::S21 => write!(f, "S21"),
            SParameter::S12 => write!(f, "S12"),
            SParameter::S22 => write!(f, "S22"),
            SParameter::Custom { output, input } => write!(f, "S{output}{input}"),
        }
    }
}

impl std::str::FromStr for SParameter {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let digits = match upper.strip_prefix('S') {
            Some(d) => d,
            None => {
                return Err(BenchError::Measurement(format!(
                    "{s:?} is not an S-parameter (expected e.g. S21)"
                )))
            }
        };
        if digits.len() != 2 || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(BenchError::Measurement(format!(
                "{s:?} is not an S-parameter (expected two port digits)"
            )));
        }
        let bytes = digits.as_bytes();
        let (output, input) = (bytes[0] - b'0', bytes[1] - b'0');
        if output == 0 || input == 0 {
            return Err(BenchError::Measurement(format!(
                "{s:?}: port numbers start at 1"
            )));
        }
        Ok(match (output, input) {
            (1, 1) => SParameter::S11,
            (2, 1) => SParameter::S21,
            (1, 2) => SParameter::S12,
            (2, 2) => SParameter::S22,
            (output, input) => SParameter::Custom { output, input },
        })
    }
}

/// A complex-valued trace on a frequency grid, as produced by a vector
/// network analyzer.
///
/// [`ComplexTrace::new`] is the only way to build one, so every trace has at
/// least one point and a grid matching the data in length.
#[derive(Debug, Clone, PartialEq)]
pub struct ComplexTrace {
    frequencies_hz: Vec<f64>,
    values: Vec<Complex64>,
}

impl ComplexTrace {
    /// Builds a trace, checking the grid and data agree in length.
    pub fn new(frequencies_hz: Vec<f64>, values: Vec<Complex64>) -> BenchResult<Self> {
        if frequencies_hz.is_empty() {
            return Err(BenchError::Measurement("trace has no points".into()));
        }
        if frequencies_hz.len() != values.len() {
            return Err(BenchError::Measurement(format!(
                "frequency grid has {} points but data has {}",
                frequencies_hz.len(),
                values.len()
            )));
        }
        Ok(Self {
            frequencies_hz,
            values,
        })
    }

    /// Stimulus frequencies in Hz.
    pub fn frequencies_hz(&self) -> &[f64] {
        &self.frequencies_hz
    }

    /// Complex value at each frequency.
    pub fn values(&self) -> &[Complex64] {
        &self.values
    }

    /// Number of points, always at least 1.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Always false; kept so `len` has its conventional partner.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Log magnitude in dB (`20 log10 |s|`), nulls clamped at the floor.
    pub fn log_magnitude_db(&self) -> Vec<f64> {
        self.values
            .iter()
            .map(|v| 20.0 * v.norm().max(MAGNITUDE_FLOOR).log10())
            .collect()
    }

    /// Phase in degrees, wrapped to (-180, 180].
    pub fn phase_deg(&self) -> Vec<f64> {
        self.values.iter().map(|v| v.arg().to_degrees()).collect()
    }

    /// The frequency and level of the highest point in dB.
    pub fn peak_db(&self) -> (f64, f64) {
        self.extremum_db(|a, b| a > b)
    }

    /// The frequency and level of the lowest point in dB, for notch hunting.
    pub fn minimum_db(&self) -> (f64, f64) {
        self.extremum_db(|a, b| a < b)
    }

    fn extremum_db(&self, better: impl Fn(f64, f64) -> bool) -> (f64, f64) {
        let db = self.log_magnitude_db();
        let mut best = (self.frequencies_hz[0], db[0]);
        for (freq, level) in self.frequencies_hz.iter().zip(db.iter()).skip(1) {
            if better(*level, best.1) {
                best = (*freq, *level);
            }
        }
        best
    }
}

/// A scalar trace in dBm on a frequency grid, as produced by a spectrum
/// analyzer.
///
/// Like [`ComplexTrace`], construction goes through [`ScalarTrace::new`], so
/// a trace is never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarTrace {
    frequencies_hz: Vec<f64>,
    values_dbm: Vec<f64>,
}

impl ScalarTrace {
    /// Builds a trace, checking the grid and data agree in length.
    pub fn new(frequencies_hz: Vec<f64>, values_dbm: Vec<f64>) -> BenchResult<Self> {
        if frequencies_hz.is_empty() {
            return Err(BenchError::Measurement("trace has no points".into()));
        }
        if frequencies_hz.len() != values_dbm.len() {
            return Err(BenchError::Measurement(format!(
                "frequency grid has {} points but data has {}",
                frequencies_hz.len(),
                values_dbm.len()
            )));
        }
        Ok(Self {
            frequencies_hz,
            values_dbm,
        })
    }

    /// Stimulus frequencies in Hz.
    pub fn frequencies_hz(&self) -> &[f64] {
        &self.frequencies_hz
    }

    /// Power at each frequency in dBm.
    pub fn values_dbm(&self) -> &[f64] {
        &self.values_dbm
    }

    /// Number of points, always at least 1.
    pub fn len(&self) -> usize {
        self.values_dbm.len()
    }

    /// Always false; kept so `len` has its conventional partner.
    pub fn is_empty(&self) -> bool {
        self.values_dbm.is_empty()
    }

    /// The frequency and power of the strongest point.
    pub fn peak(&self) -> (f64, f64) {
        let mut best = (self.frequencies_hz[0], self.values_dbm[0]);
        for (freq, dbm) in self.frequencies_hz.iter().zip(self.values_dbm.iter()).skip(1) {
            if *dbm > best.1 {
                best = (*freq, *dbm);
            }
        }
        best
    }
}

/// One marker readout from an analyzer display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MarkerReading {
    /// Measurement channel or trace number the marker sits on.
    pub trace: u8,
    /// Marker number (1-based).
    pub marker: u8,
    /// Marker stimulus position in Hz.
    pub x_hz: f64,
    /// Marker response value in the trace's display format, usually dB.
    pub y: f64,
}

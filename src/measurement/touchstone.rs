//! Touchstone (`.s1p`/`.s2p`) export.
//!
//! Files are written in Touchstone v1 with the option line `# Hz S RI R 50`:
//! frequencies in Hz, S-parameters as real/imaginary pairs, 50 ohm
//! reference. Two-port rows carry the parameters in the v1 column order
//! S11, S21, S12, S22.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use chrono::Utc;

use crate::error::{BenchError, BenchResult};
use crate::measurement::trace::ComplexTrace;

/// Option line shared by both formats.
const OPTION_LINE: &str = "# Hz S RI R 50";

/// A full 2-port acquisition on a common frequency grid.
///
/// Built through [`TwoPortSweep::new`], which checks the four traces share
/// one grid.
#[derive(Debug, Clone)]
pub struct TwoPortSweep {
    s11: ComplexTrace,
    s21: ComplexTrace,
    s12: ComplexTrace,
    s22: ComplexTrace,
}

impl TwoPortSweep {
    /// Builds a 2-port set, checking all four traces share one grid.
    pub fn new(
        s11: ComplexTrace,
        s21: ComplexTrace,
        s12: ComplexTrace,
        s22: ComplexTrace,
    ) -> BenchResult<Self> {
        for (name, trace) in [("S21", &s21), ("S12", &s12), ("S22", &s22)] {
            if trace.frequencies_hz() != s11.frequencies_hz() {
                return Err(BenchError::Measurement(format!(
                    "{name} was taken on a different frequency grid than S11"
                )));
            }
        }
        Ok(Self { s11, s21, s12, s22 })
    }

    /// Input reflection.
    pub fn s11(&self) -> &ComplexTrace {
        &self.s11
    }

    /// Forward transmission.
    pub fn s21(&self) -> &ComplexTrace {
        &self.s21
    }

    /// Reverse transmission.
    pub fn s12(&self) -> &ComplexTrace {
        &self.s12
    }

    /// Output reflection.
    pub fn s22(&self) -> &ComplexTrace {
        &self.s22
    }

    /// Number of frequency points.
    pub fn len(&self) -> usize {
        self.s11.len()
    }

    /// True when the sweep holds no points. Constructed sweeps never are.
    pub fn is_empty(&self) -> bool {
        self.s11.is_empty()
    }
}

/// Renders a 1-port trace as Touchstone text.
pub fn format_s1p(trace: &ComplexTrace) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "! 1-port S-parameter data");
    let _ = writeln!(out, "{OPTION_LINE}");
    for (freq, value) in trace.frequencies_hz().iter().zip(trace.values().iter()) {
        let _ = writeln!(out, "{freq:.6E} {:.9E} {:.9E}", value.re, value.im);
    }
    out
}

/// Renders a 2-port sweep as Touchstone text.
pub fn format_s2p(sweep: &TwoPortSweep) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "! 2-port S-parameter data: S11 S21 S12 S22");
    let _ = writeln!(out, "{OPTION_LINE}");
    for (i, freq) in sweep.s11.frequencies_hz().iter().enumerate() {
        let _ = writeln!(
            out,
            "{freq:.6E} {:.9E} {:.9E} {:.9E} {:.9E} {:.9E} {:.9E} {:.9E} {:.9E}",
            sweep.s11.values()[i].re,
            sweep.s11.values()[i].im,
            sweep.s21.values()[i].re,
            sweep.s21.values()[i].im,
            sweep.s12.values()[i].re,
            sweep.s12.values()[i].im,
            sweep.s22.values()[i].re,
            sweep.s22.values()[i].im,
        );
    }
    out
}

fn write_with_banner(path: &Path, body: String) -> BenchResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(BenchError::Io)?;
        }
    }
    let banner = format!("! rf-bench export, {}\n", Utc::now().to_rfc3339());
    fs::write(path, banner + body.as_str()).map_err(BenchError::Io)
}

/// Writes a 1-port trace to `path`, creating parent directories as needed.
pub fn write_s1p(path: impl AsRef<Path>, trace: &ComplexTrace) -> BenchResult<()> {
    write_with_banner(path.as_ref(), format_s1p(trace))
}

/// Writes a 2-port sweep to `path`, creating parent directories as needed.
pub fn write_s2p(path: impl AsRef<Path>, sweep: &TwoPortSweep) -> BenchResult<()> {
    write_with_banner(path.as_ref(), format_s2p(sweep))
}

//! CSV export of traces, marker tables, and power-monitor logs.
//!
//! Only built with the `storage_csv` feature. Complex traces are written
//! with both raw and derived columns so downstream tooling does not need to
//! recompute dB or phase.

use std::fs;
use std::fs::File;
use std::path::Path;

use chrono::Utc;

use crate::error::{BenchError, BenchResult};
use crate::measurement::trace::{ComplexTrace, MarkerReading, ScalarTrace};

fn csv_err(e: csv::Error) -> BenchError {
    BenchError::Measurement(format!("csv: {e}"))
}

fn ensure_parent(path: &Path) -> BenchResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(BenchError::Io)?;
        }
    }
    Ok(())
}

/// Writes a complex trace with raw and derived columns.
pub fn write_complex_trace_csv(path: impl AsRef<Path>, trace: &ComplexTrace) -> BenchResult<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    writer
        .write_record(["frequency_hz", "real", "imag", "magnitude_db", "phase_deg"])
        .map_err(csv_err)?;
    let db = trace.log_magnitude_db();
    let phase = trace.phase_deg();
    for (i, freq) in trace.frequencies_hz().iter().enumerate() {
        writer
            .write_record([
                freq.to_string(),
                trace.values()[i].re.to_string(),
                trace.values()[i].im.to_string(),
                db[i].to_string(),
                phase[i].to_string(),
            ])
            .map_err(csv_err)?;
    }
    writer.flush().map_err(BenchError::Io)?;
    Ok(())
}

/// Writes a scalar (spectrum) trace.
pub fn write_scalar_trace_csv(path: impl AsRef<Path>, trace: &ScalarTrace) -> BenchResult<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    writer
        .write_record(["frequency_hz", "power_dbm"])
        .map_err(csv_err)?;
    for (freq, dbm) in trace.frequencies_hz().iter().zip(trace.values_dbm().iter()) {
        writer
            .write_record([freq.to_string(), dbm.to_string()])
            .map_err(csv_err)?;
    }
    writer.flush().map_err(BenchError::Io)?;
    Ok(())
}

/// Writes a marker table.
pub fn write_markers_csv(path: impl AsRef<Path>, markers: &[MarkerReading]) -> BenchResult<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    writer
        .write_record(["trace", "marker", "x_hz", "y"])
        .map_err(csv_err)?;
    for m in markers {
        writer
            .write_record([
                m.trace.to_string(),
                m.marker.to_string(),
                m.x_hz.to_string(),
                m.y.to_string(),
            ])
            .map_err(csv_err)?;
    }
    writer.flush().map_err(BenchError::Io)?;
    Ok(())
}

/// Append-only timestamped power log, used by the monitor loop.
///
/// Rows are flushed as they are written so a cancelled monitor run still
/// leaves a complete file.
pub struct PowerLog {
    writer: csv::Writer<File>,
}

impl PowerLog {
    /// Creates the log file and writes the header row.
    pub fn create(path: impl AsRef<Path>) -> BenchResult<Self> {
        let path = path.as_ref();
        ensure_parent(path)?;
        let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
        writer
            .write_record(["timestamp_utc", "power_dbm"])
            .map_err(csv_err)?;
        writer.flush().map_err(BenchError::Io)?;
        Ok(Self { writer })
    }

    /// Appends one reading stamped with the current UTC time.
    pub fn append(&mut self, power_dbm: f64) -> BenchResult<()> {
        self.writer
            .write_record([Utc::now().to_rfc3339(), power_dbm.to_string()])
            .map_err(csv_err)?;
        self.writer.flush().map_err(BenchError::Io)?;
        Ok(())
    }
}

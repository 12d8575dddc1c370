//! Measurement data model and exporters.
//!
//! Sweep plans, complex and scalar traces, and marker readings live in
//! [`trace`]; Touchstone (`.s1p`/`.s2p`) export in [`touchstone`]; CSV export
//! and the power-monitor log in [`storage`] (behind the `storage_csv`
//! feature).

#[cfg(feature = "storage_csv")]
pub mod storage;
pub mod touchstone;
pub mod trace;

pub use touchstone::TwoPortSweep;
pub use trace::{linspace, ComplexTrace, MarkerReading, SParameter, ScalarTrace, SweepPlan};

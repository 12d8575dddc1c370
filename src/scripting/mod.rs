//! Rhai scripting for bench automation.
//!
//! [`ScriptHost`] owns the engine and its operation limit; [`bindings`]
//! exposes instrument handles and bench utilities to scripts. A typical
//! automation run builds a [`crate::bench::Bench`], derives a scope with
//! [`bench_scope`], and evaluates the operator's script:
//!
//! ```rust,ignore
//! use rf_bench::bench::Bench;
//! use rf_bench::scripting::{bench_scope, ScriptHost};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let bench = Bench::mock().await?;
//! let host = ScriptHost::new();
//! let mut scope = bench_scope(&bench);
//! host.run_with_scope(&mut scope, r#"
//!     source.set_frequency(1.5e9);
//!     source.output_on();
//!     print("sensor reads " + sensor.read_dbm() + " dBm");
//! "#)?;
//! bench.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Scripts can also build standalone mock handles with `mock_source()`,
//! `mock_sensor()`, and `mock_vna()`, so automation logic is testable
//! without a bench config.

pub mod bindings;
pub mod engine;

pub use bindings::{bench_scope, register_bench, SensorHandle, SourceHandle, VnaHandle};
pub use engine::{ScriptHost, MAX_OPERATIONS};

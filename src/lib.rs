//! # rf-bench
//!
//! Control library for an RF measurement bench: SCPI instruments reached over
//! raw TCP sockets or serial lines, driven from Rust or from Rhai automation
//! scripts.
//!
//! ## Crate Structure
//!
//! - **`visa`**: VISA-style resource addresses (`TCPIP0::host::5025::SOCKET`,
//!   `ASRL/dev/ttyUSB0::INSTR`) and the transports behind them.
//! - **`scpi`**: the SCPI session layer. Line-oriented command/query exchange,
//!   IEEE 488.2 common commands, definite-length block responses, and
//!   instrument error-queue draining.
//! - **`instruments`**: capability traits (`RfSource`, `PowerSensor`,
//!   `SpectrumSweep`, `NetworkAnalyzer`), the drivers implementing them, mock
//!   implementations, and the registry that owns connected instruments.
//! - **`measurement`**: sweep plans, complex and scalar traces, markers, and
//!   exporters (Touchstone, CSV).
//! - **`bench`**: brings a configured set of instruments up as one unit and
//!   shuts them down safely.
//! - **`scripting`**: Rhai host and instrument bindings for automation.
//! - **`config`**: TOML + environment configuration.
//! - **`telemetry`**: tracing subscriber setup.
//! - **`error`**: the [`error::BenchError`] type used across the crate.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rf_bench::bench::Bench;
//! use rf_bench::config::BenchConfig;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = BenchConfig::load_from("config/bench.toml")?;
//! let bench = Bench::from_config(config).await?;
//! let vna = bench.registry().vna("vna")?;
//! vna.preset().await?;
//! bench.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod bench;
pub mod config;
pub mod error;
pub mod instruments;
pub mod measurement;
pub mod scpi;
pub mod scripting;
pub mod telemetry;
pub mod visa;

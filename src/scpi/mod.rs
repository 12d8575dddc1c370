//! SCPI protocol layer.
//!
//! SCPI (Standard Commands for Programmable Instruments) is the standardized
//! command set spoken by the test and measurement instruments this crate
//! drives. The layer is split in two:
//!
//! - [`session`] owns a transport and provides command/query primitives plus
//!   the IEEE 488.2 common operations (`*IDN?`, `*RST`, `*CLS`, `*OPC?`) and
//!   error-queue handling every driver needs.
//! - [`response`] holds the pure parsing and encoding helpers: float lists,
//!   interleaved complex data, booleans, `SYST:ERR?` lines, and definite
//!   length binary blocks.
//!
//! ## Conventions
//!
//! - Commands are terminated with a single `\n`; queries end in `?`.
//! - One `ScpiSession` serializes all traffic to its instrument, so a query's
//!   reply cannot be stolen by a concurrent caller.
//! - Mutating driver operations are expected to call
//!   [`session::ScpiSession::check_errors`] so instrument-side rejections
//!   surface as `Err` instead of silent misconfiguration.

pub mod response;
pub mod session;

pub use response::Identity;
pub use session::ScpiSession;

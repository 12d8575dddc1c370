//! Instrument drivers and the capability registry.
//!
//! [`capabilities`] defines the trait seams (`RfSource`, `PowerSensor`,
//! `SpectrumSweep`, `NetworkAnalyzer`); one module per hardware driver
//! implements them over a [`crate::scpi::ScpiSession`]; [`mock`] provides
//! in-memory stand-ins; [`registry`] wires configured instruments together
//! under their bench ids.

pub mod capabilities;
pub mod mock;
pub mod n1913a;
pub mod pnax;
pub mod registry;
pub mod smb100a;
pub mod xseries;

pub use capabilities::{NetworkAnalyzer, PowerSensor, RfSource, SpectrumSweep};
pub use n1913a::N1913a;
pub use pnax::PnaX;
pub use registry::{Capability, DriverKind, InstrumentInfo, InstrumentRegistry};
pub use smb100a::Smb100a;
pub use xseries::XSeriesSa;

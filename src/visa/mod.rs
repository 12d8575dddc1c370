//! Instrument connectivity layer.
//!
//! Instruments are addressed with VISA-style resource strings
//! ([`ResourceAddr`]) and reached through the byte-oriented [`Transport`]
//! trait. Two real transports exist: raw TCP sockets ([`TcpTransport`]) and,
//! behind the `instrument_serial` feature, RS-232 serial ports
//! ([`serial::SerialTransport`]). [`MockTransport`] replays scripted
//! exchanges for protocol tests without hardware.
//!
//! No external VISA library is involved. `::SOCKET` resources connect
//! directly; `::INSTR` LAN resources are served over the instrument's raw
//! SCPI socket instead of VXI-11.

pub mod mock;
pub mod resource;
#[cfg(feature = "instrument_serial")]
pub mod serial;
pub mod transport;

pub use mock::MockTransport;
pub use resource::ResourceAddr;
pub use transport::{connect, TcpTransport, Transport};

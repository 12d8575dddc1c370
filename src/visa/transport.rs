//! Byte-oriented instrument transports.
//!
//! [`Transport`] is the seam between the SCPI session layer and the wire.
//! Implementations do unbounded reads; timeouts are applied one layer up by
//! [`crate::scpi::ScpiSession`], which wraps every transport call in
//! `tokio::time::timeout`. Connect timeouts are handled here because no
//! session exists yet at that point.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{BenchError, BenchResult, ScpiError};
use crate::visa::resource::{ResourceAddr, RAW_SCPI_PORT};

/// Read buffer growth increment.
const READ_CHUNK: usize = 8 * 1024;

/// Splits one terminated line off the front of `buf`, stripping the trailing
/// `\n` and an optional preceding `\r`. Returns `None` when no full line has
/// arrived yet.
pub(crate) fn take_line(buf: &mut BytesMut) -> Option<Bytes> {
    let pos = buf.iter().position(|&b| b == b'\n')?;
    let mut line = buf.split_to(pos + 1);
    line.truncate(pos);
    if line.last() == Some(&b'\r') {
        line.truncate(line.len() - 1);
    }
    Some(line.freeze())
}

/// A bidirectional byte stream to one instrument.
///
/// # Contract
///
/// - `send` transmits the payload verbatim; callers append command
///   terminators themselves.
/// - `receive_line` returns one response line with the trailing `\n` (and
///   `\r`, if present) stripped.
/// - `receive_exact` and `receive_byte` return raw bytes unmodified, for
///   IEEE 488.2 block transfers.
/// - A cleanly closed connection surfaces as `io::ErrorKind::UnexpectedEof`.
#[async_trait]
pub trait Transport: Send {
    /// Sends raw bytes to the instrument.
    async fn send(&mut self, payload: &[u8]) -> io::Result<()>;

    /// Receives one newline-terminated response, without the terminator.
    async fn receive_line(&mut self) -> io::Result<Bytes>;

    /// Receives exactly `len` bytes.
    async fn receive_exact(&mut self, len: usize) -> io::Result<Bytes>;

    /// Receives a single byte.
    async fn receive_byte(&mut self) -> io::Result<u8>;

    /// Human-readable endpoint description for log messages.
    fn describe(&self) -> String;
}

/// Raw SCPI over a TCP socket.
pub struct TcpTransport {
    stream: TcpStream,
    buf: BytesMut,
    peer: String,
}

impl TcpTransport {
    /// Opens a TCP connection, failing after `timeout`.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> BenchResult<Self> {
        let endpoint = format!("{host}:{port}");
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&endpoint))
            .await
            .map_err(|_| BenchError::Scpi(ScpiError::Timeout { waited: timeout }))?
            .map_err(BenchError::Io)?;
        // SCPI exchanges are small request/response pairs; Nagle only adds
        // latency here.
        stream.set_nodelay(true).map_err(BenchError::Io)?;
        debug!(endpoint = %endpoint, "tcp transport connected");
        Ok(Self {
            stream,
            buf: BytesMut::with_capacity(READ_CHUNK),
            peer: endpoint,
        })
    }

    async fn fill(&mut self) -> io::Result<usize> {
        self.stream.read_buf(&mut self.buf).await
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, payload: &[u8]) -> io::Result<()> {
        self.stream.write_all(payload).await
    }

    async fn receive_line(&mut self) -> io::Result<Bytes> {
        loop {
            if let Some(line) = take_line(&mut self.buf) {
                return Ok(line);
            }
            if self.fill().await? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("connection to {} closed mid-line", self.peer),
                ));
            }
        }
    }

    async fn receive_exact(&mut self, len: usize) -> io::Result<Bytes> {
        while self.buf.len() < len {
            if self.fill().await? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "connection to {} closed after {} of {} bytes",
                        self.peer,
                        self.buf.len(),
                        len
                    ),
                ));
            }
        }
        Ok(self.buf.split_to(len).freeze())
    }

    async fn receive_byte(&mut self) -> io::Result<u8> {
        let byte = self.receive_exact(1).await?;
        Ok(byte[0])
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.peer)
    }
}

/// Opens the transport an address points at.
///
/// `INSTR` LAN resources are served over the instrument's raw SCPI socket
/// (port 5025); VXI-11 and HiSLIP are not spoken here. Serial resources
/// require the `instrument_serial` feature.
pub async fn connect(addr: &ResourceAddr, timeout: Duration) -> BenchResult<Box<dyn Transport>> {
    match addr {
        ResourceAddr::TcpSocket { host, port } => {
            Ok(Box::new(TcpTransport::connect(host, *port, timeout).await?))
        }
        ResourceAddr::TcpInstr { host, lan_device } => {
            debug!(
                host = %host,
                lan_device = %lan_device,
                port = RAW_SCPI_PORT,
                "INSTR resource served over the raw SCPI socket"
            );
            Ok(Box::new(
                TcpTransport::connect(host, RAW_SCPI_PORT, timeout).await?,
            ))
        }
        #[cfg(feature = "instrument_serial")]
        ResourceAddr::Serial { path } => Ok(Box::new(
            crate::visa::serial::SerialTransport::open(path, crate::visa::serial::DEFAULT_BAUD)?,
        )),
        #[cfg(not(feature = "instrument_serial"))]
        ResourceAddr::Serial { .. } => {
            Err(BenchError::FeatureNotEnabled("instrument_serial".into()))
        }
    }
}

//! Serial (ASRL) transport.
//!
//! RS-232 instruments are wired 8N1 with no flow control, which covers the
//! power sensors and older signal generators this crate targets. The line
//! discipline matches [`super::TcpTransport`]: commands are sent verbatim and
//! responses are newline-terminated.

use std::io;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::debug;

use crate::error::{BenchError, BenchResult};
use crate::visa::transport::{take_line, Transport};

/// Baud rate used when the resource string does not carry one.
pub const DEFAULT_BAUD: u32 = 9600;

/// SCPI over an RS-232 serial port.
pub struct SerialTransport {
    port: SerialStream,
    buf: BytesMut,
    path: String,
}

impl SerialTransport {
    /// Opens the serial device at 8N1 with no flow control.
    pub fn open(path: &str, baud: u32) -> BenchResult<Self> {
        let port = tokio_serial::new(path, baud)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| BenchError::Io(io::Error::new(io::ErrorKind::Other, e)))?;
        debug!(path = %path, baud = baud, "serial transport opened");
        Ok(Self {
            port,
            buf: BytesMut::with_capacity(1024),
            path: path.to_string(),
        })
    }

    async fn fill(&mut self) -> io::Result<usize> {
        self.port.read_buf(&mut self.buf).await
    }

    fn eof(&self) -> io::Error {
        io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("serial port {} closed", self.path),
        )
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send(&mut self, payload: &[u8]) -> io::Result<()> {
        self.port.write_all(payload).await?;
        self.port.flush().await
    }

    async fn receive_line(&mut self) -> io::Result<Bytes> {
        loop {
            if let Some(line) = take_line(&mut self.buf) {
                return Ok(line);
            }
            if self.fill().await? == 0 {
                return Err(self.eof());
            }
        }
    }

    async fn receive_exact(&mut self, len: usize) -> io::Result<Bytes> {
        while self.buf.len() < len {
            if self.fill().await? == 0 {
                return Err(self.eof());
            }
        }
        Ok(self.buf.split_to(len).freeze())
    }

    async fn receive_byte(&mut self) -> io::Result<u8> {
        let byte = self.receive_exact(1).await?;
        Ok(byte[0])
    }

    fn describe(&self) -> String {
        format!("serial://{}", self.path)
    }
}

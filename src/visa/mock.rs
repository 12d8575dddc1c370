//! Scripted transport for protocol tests.
//!
//! [`MockTransport`] replays a fixed sequence of expected commands and canned
//! replies, letting session and driver tests assert the exact SCPI traffic a
//! code path produces without any hardware attached. Deviations from the
//! script surface as I/O errors so the failing command shows up in the test
//! output.
//!
//! The transport is a shared handle: cloning it before boxing gives the test
//! a probe into the traffic log after the session has taken ownership.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use crate::visa::transport::{take_line, Transport};

#[derive(Debug, Clone)]
enum Reply {
    /// Write-only command, nothing comes back.
    None,
    /// Text reply; a newline terminator is appended.
    Text(String),
    /// Raw bytes queued exactly as given (block transfers).
    Raw(Vec<u8>),
    /// The instrument never answers; reads hang until the caller's timeout.
    Silence,
}

#[derive(Debug, Clone)]
struct Exchange {
    expect: String,
    reply: Reply,
}

#[derive(Default)]
struct State {
    script: VecDeque<Exchange>,
    rx: BytesMut,
    sent: Vec<String>,
    starved: bool,
}

/// Transport that serves scripted exchanges instead of touching hardware.
#[derive(Default, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<State>>,
}

impl MockTransport {
    /// Creates an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // State is plain data; a poisoned lock just means another test
        // thread panicked mid-assertion.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Expects a write-only command (terminator stripped before comparison).
    pub fn expect(self, command: &str) -> Self {
        self.state().script.push_back(Exchange {
            expect: command.to_string(),
            reply: Reply::None,
        });
        self
    }

    /// Expects a query and queues `reply` plus a newline terminator.
    pub fn expect_reply(self, command: &str, reply: &str) -> Self {
        self.state().script.push_back(Exchange {
            expect: command.to_string(),
            reply: Reply::Text(reply.to_string()),
        });
        self
    }

    /// Expects a query and queues raw reply bytes with no terminator added.
    pub fn expect_reply_raw(self, command: &str, reply: Vec<u8>) -> Self {
        self.state().script.push_back(Exchange {
            expect: command.to_string(),
            reply: Reply::Raw(reply),
        });
        self
    }

    /// Expects a query that the instrument never answers.
    pub fn expect_silence(self, command: &str) -> Self {
        self.state().script.push_back(Exchange {
            expect: command.to_string(),
            reply: Reply::Silence,
        });
        self
    }

    /// Every command sent so far, terminators stripped.
    pub fn sent(&self) -> Vec<String> {
        self.state().sent.clone()
    }

    /// True once the whole script has been consumed.
    pub fn finished(&self) -> bool {
        self.state().script.is_empty()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, payload: &[u8]) -> io::Result<()> {
        let text = String::from_utf8_lossy(payload)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        let mut state = self.state();
        let exchange = state.script.pop_front().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unscripted command {text:?}"),
            )
        })?;
        if exchange.expect != text {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("expected command {:?}, got {:?}", exchange.expect, text),
            ));
        }
        state.sent.push(text);
        match exchange.reply {
            Reply::None => {}
            Reply::Text(reply) => {
                state.rx.extend_from_slice(reply.as_bytes());
                state.rx.extend_from_slice(b"\n");
            }
            Reply::Raw(bytes) => state.rx.extend_from_slice(&bytes),
            Reply::Silence => state.starved = true,
        }
        Ok(())
    }

    async fn receive_line(&mut self) -> io::Result<Bytes> {
        let starved = {
            let mut state = self.state();
            if let Some(line) = take_line(&mut state.rx) {
                return Ok(line);
            }
            state.starved
        };
        if starved {
            std::future::pending::<()>().await;
        }
        Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "mock transport has no queued reply",
        ))
    }

    async fn receive_exact(&mut self, len: usize) -> io::Result<Bytes> {
        let (starved, queued) = {
            let mut state = self.state();
            if state.rx.len() >= len {
                return Ok(state.rx.split_to(len).freeze());
            }
            (state.starved, state.rx.len())
        };
        if starved {
            std::future::pending::<()>().await;
        }
        Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("mock transport has {queued} of {len} bytes queued"),
        ))
    }

    async fn receive_byte(&mut self) -> io::Result<u8> {
        let byte = self.receive_exact(1).await?;
        Ok(byte[0])
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

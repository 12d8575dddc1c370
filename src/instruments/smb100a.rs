//! # Rohde & Schwarz SMB100A Signal Generator
//!
//! Driver for the SMB100A analog signal generator over raw SCPI (port 5025
//! on the instrument).
//!
//! ## Protocol
//!
//! - `FREQ <hz>` / `FREQ?` - CW frequency
//! - `POW <dbm>` / `POW?` - output level
//! - `OUTP ON|OFF` / `OUTP?` - RF output state
//!
//! Setpoints are range-checked in the driver before they go on the wire, so
//! a typo'd `set_level_dbm(100.0)` fails fast instead of leaving the
//! generator at its previous level with an error queued.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::info;

use crate::instruments::capabilities::RfSource;
use crate::scpi::response::Identity;
use crate::scpi::ScpiSession;
use crate::visa::ResourceAddr;

/// Frequency floor, 8 kHz on all SMB100A RF paths.
const MIN_FREQUENCY_HZ: f64 = 8.0e3;
/// Frequency ceiling for the B106 option fitted on our units.
const MAX_FREQUENCY_HZ: f64 = 6.0e9;
/// Settable level range in dBm.
const LEVEL_RANGE_DBM: (f64, f64) = (-145.0, 30.0);

/// Rohde & Schwarz SMB100A driver.
pub struct Smb100a {
    session: ScpiSession,
    identity: Option<Identity>,
}

impl Smb100a {
    /// Connects, clears status, and identifies the instrument.
    pub async fn connect(addr: &ResourceAddr, timeout: Duration) -> Result<Self> {
        let session = ScpiSession::connect(addr, timeout)
            .await
            .with_context(|| format!("connecting to SMB100A at {addr}"))?;
        session.clear_status().await?;
        let identity = session.identify().await?;
        info!(instrument = %session.target(), identity = %identity, "SMB100A connected");
        let mut source = Self::over(session);
        source.identity = Some(identity);
        Ok(source)
    }

    /// Wraps an existing session without touching the instrument.
    pub fn over(session: ScpiSession) -> Self {
        Self {
            session,
            identity: None,
        }
    }

    /// Identity captured at connect time, if any.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }
}

#[async_trait]
impl RfSource for Smb100a {
    async fn set_frequency(&self, hz: f64) -> Result<()> {
        if !(MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&hz) {
            bail!(
                "frequency {hz} Hz outside the SMB100A range \
                 ({MIN_FREQUENCY_HZ} Hz to {MAX_FREQUENCY_HZ} Hz)"
            );
        }
        self.session.write(&format!("FREQ {hz}")).await?;
        self.session.check_errors("set frequency").await?;
        Ok(())
    }

    async fn frequency(&self) -> Result<f64> {
        Ok(self.session.query_f64("FREQ?").await?)
    }

    async fn set_level_dbm(&self, dbm: f64) -> Result<()> {
        if !(LEVEL_RANGE_DBM.0..=LEVEL_RANGE_DBM.1).contains(&dbm) {
            bail!(
                "level {dbm} dBm outside the SMB100A range ({} to {} dBm)",
                LEVEL_RANGE_DBM.0,
                LEVEL_RANGE_DBM.1
            );
        }
        self.session.write(&format!("POW {dbm}")).await?;
        self.session.check_errors("set level").await?;
        Ok(())
    }

    async fn level_dbm(&self) -> Result<f64> {
        Ok(self.session.query_f64("POW?").await?)
    }

    async fn set_output(&self, on: bool) -> Result<()> {
        let state = if on { "ON" } else { "OFF" };
        self.session.write(&format!("OUTP {state}")).await?;
        self.session.check_errors("set output").await?;
        Ok(())
    }

    async fn output(&self) -> Result<bool> {
        Ok(self.session.query_bool("OUTP?").await?)
    }
}

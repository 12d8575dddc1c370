//! # Keysight N1913A EPM Power Meter
//!
//! Driver for the N1913A single-channel EPM power meter over raw SCPI.
//! Readings are fixed to dBm at connect time.
//!
//! ## Protocol
//!
//! - `UNIT:POW DBM` - reading units, issued once on connect
//! - `READ?` - abort, initiate, and fetch one fresh reading
//! - `SENS:FREQ <hz>` - calibration-factor frequency
//! - `SENS:AVER:COUN <n>` / `SENS:AVER:STAT` - averaging
//! - `CAL:ZERO:AUTO ONCE` + `*OPC?` - sensor zeroing
//!
//! Zeroing takes on the order of ten seconds; the session timeout bounds the
//! `*OPC?` wait, so give this instrument a generous `timeout` in the bench
//! config if zeroing is part of the sequence.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::info;

use crate::instruments::capabilities::PowerSensor;
use crate::scpi::response::{self, Identity};
use crate::scpi::ScpiSession;
use crate::visa::ResourceAddr;

/// Averaging count ceiling from the EPM manual.
const MAX_AVERAGING: u32 = 1024;

/// Keysight N1913A power meter driver.
pub struct N1913a {
    session: ScpiSession,
    identity: Option<Identity>,
}

impl N1913a {
    /// Connects, identifies the meter, and fixes readings to dBm.
    pub async fn connect(addr: &ResourceAddr, timeout: Duration) -> Result<Self> {
        let session = ScpiSession::connect(addr, timeout)
            .await
            .with_context(|| format!("connecting to N1913A at {addr}"))?;
        session.clear_status().await?;
        let identity = session.identify().await?;
        session.write("UNIT:POW DBM").await?;
        session.check_errors("set units").await?;
        info!(instrument = %session.target(), identity = %identity, "N1913A connected");
        let mut meter = Self::over(session);
        meter.identity = Some(identity);
        Ok(meter)
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
impl PowerSensor for N1913a {
    async fn read_dbm(&self) -> Result<f64> {
        let value = self.session.query_f64("READ?").await?;
        if response::is_nan_sentinel(value) {
            bail!("sensor returned the invalid-reading sentinel (9.91E37); check the RF path");
        }
        Ok(value)
    }

    async fn set_frequency(&self, hz: f64) -> Result<()> {
        self.session.write(&format!("SENS:FREQ {hz}")).await?;
        self.session
            .check_errors("set calibration frequency")
            .await?;
        Ok(())
    }

    async fn zero(&self) -> Result<()> {
        self.session.write("CAL:ZERO:AUTO ONCE").await?;
        self.session
            .wait_complete()
            .await
            .context("waiting for sensor zero to finish")?;
        self.session.check_errors("zero sensor").await?;
        Ok(())
    }

    async fn set_averaging(&self, count: u32) -> Result<()> {
        if count == 0 || count > MAX_AVERAGING {
            bail!("averaging count must be 1-{MAX_AVERAGING}, got {count}");
        }
        if count == 1 {
            self.session.write("SENS:AVER:STAT OFF").await?;
        } else {
            self.session
                .write(&format!("SENS:AVER:COUN {count}"))
                .await?;
            self.session.write("SENS:AVER:STAT ON").await?;
        }
        self.session.check_errors("set averaging").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visa::MockTransport;

    fn meter(mock: MockTransport) -> N1913a {
        N1913a::over(ScpiSession::over(
            Box::new(mock),
            Duration::from_millis(200),
            "mock-epm",
        ))
    }

    const NO_ERROR: &str = "+0,\"No error\"";

    #[tokio::test]
    async fn read_returns_fresh_value() {
        let mock = MockTransport::new().expect_reply("READ?", "-2.7315E+01");
        assert_eq!(meter(mock).read_dbm().await.unwrap(), -27.315);
    }

    #[tokio::test]
    async fn nan_sentinel_becomes_an_error() {
        let mock = MockTransport::new().expect_reply("READ?", "9.91E+37");
        let err = meter(mock).read_dbm().await.unwrap_err();
        assert!(err.to_string().contains("9.91E37"));
    }

    #[tokio::test]
    async fn zero_waits_for_completion() {
        let mock = MockTransport::new()
            .expect("CAL:ZERO:AUTO ONCE")
            .expect_reply("*OPC?", "1")
            .expect_reply("SYST:ERR?", NO_ERROR);
        let probe = mock.clone();
        meter(mock).zero().await.unwrap();
        assert!(probe.finished());
    }

    #[tokio::test]
    async fn averaging_of_one_disables_averaging() {
        let mock = MockTransport::new()
            .expect("SENS:AVER:STAT OFF")
            .expect_reply("SYST:ERR?", NO_ERROR);
        meter(mock).set_averaging(1).await.unwrap();

        let mock = MockTransport::new()
            .expect("SENS:AVER:COUN 64")
            .expect("SENS:AVER:STAT ON")
            .expect_reply("SYST:ERR?", NO_ERROR);
        let probe = mock.clone();
        meter(mock).set_averaging(64).await.unwrap();
        assert!(probe.finished());
    }

    #[tokio::test]
    async fn averaging_bounds_are_checked_locally() {
        let m = meter(MockTransport::new());
        assert!(m.set_averaging(0).await.is_err());
        assert!(m.set_averaging(2048).await.is_err());
    }
}

//! Bench lifecycle.
//!
//! A [`Bench`] owns the instrument registry for one configured measurement
//! setup. Startup connects every enabled instrument concurrently; shutdown
//! returns RF outputs to a safe state, attempting every instrument even when
//! some fail.

use futures::future::try_join_all;
use tracing::{error, info};

use crate::config::{BenchConfig, InstrumentDefinition};
use crate::error::{BenchError, BenchResult};
use crate::instruments::registry::{instantiate, DriverKind, InstrumentRegistry};

/// A configured bench: connected instruments behind a capability registry.
pub struct Bench {
    config: BenchConfig,
    registry: InstrumentRegistry,
}

impl std::fmt::Debug for Bench {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bench")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Bench {
    /// Validates `config` and connects every enabled instrument.
    ///
    /// Connections run concurrently; the first failure aborts startup and the
    /// error names the instrument that caused it.
    pub async fn from_config(config: BenchConfig) -> BenchResult<Self> {
        config.validate()?;
        let enabled = config.enabled_instruments();
        info!(
            name = %config.application.name,
            instruments = enabled.len(),
            "bringing up bench"
        );
        let connections = enabled.into_iter().map(|definition| async move {
            let instrument = instantiate(definition).await?;
            Ok::<_, BenchError>((definition.id.clone(), instrument))
        });
        let connected = try_join_all(connections).await?;

        let mut registry = InstrumentRegistry::new();
        for (id, instrument) in connected {
            registry.insert(id, instrument)?;
        }
        Ok(Self { config, registry })
    }

    /// A bench with one mock instrument of every kind, for scripts and tests
    /// that run without hardware.
    ///
    /// Ids: `vna`, `source`, `sensor`, `spectrum`.
    pub async fn mock() -> BenchResult<Self> {
        let mut config = BenchConfig::default();
        config.instruments = vec![
            InstrumentDefinition::new("vna", DriverKind::MockVna),
            InstrumentDefinition::new("source", DriverKind::MockSource),
            InstrumentDefinition::new("sensor", DriverKind::MockPowerSensor),
            InstrumentDefinition::new("spectrum", DriverKind::MockSpectrum),
        ];
        Self::from_config(config).await
    }

    /// The capability registry.
    pub fn registry(&self) -> &InstrumentRegistry {
        &self.registry
    }

    /// The configuration the bench was built from.
    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    /// Turns every RF output off and consumes the bench.
    ///
    /// Every instrument is attempted even after a failure; failures are
    /// aggregated into [`BenchError::ShutdownFailed`].
    pub async fn shutdown(self) -> BenchResult<()> {
        let failures = self.registry.quiesce().await;
        if failures.is_empty() {
            info!("bench shut down");
            Ok(())
        } else {
            for failure in &failures {
                error!(error = %failure, "shutdown step failed");
            }
            Err(BenchError::ShutdownFailed(failures))
        }
    }
}

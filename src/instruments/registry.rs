//! Instrument registry.
//!
//! The registry maps bench-config ids to connected instruments and hands out
//! capability handles as `Arc<dyn Trait>` clones. Callers ask for the
//! capability they need (`rf_source("sig_gen")`), not for a concrete driver,
//! so test sequences stay hardware-agnostic.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::InstrumentDefinition;
use crate::error::{BenchError, BenchResult};
use crate::instruments::capabilities::{NetworkAnalyzer, PowerSensor, RfSource, SpectrumSweep};
use crate::instruments::mock::{MockPowerSensor, MockRfSource, MockSpectrum, MockVna};
use crate::instruments::n1913a::N1913a;
use crate::instruments::pnax::PnaX;
use crate::instruments::smb100a::Smb100a;
use crate::instruments::xseries::XSeriesSa;
use crate::scpi::Identity;
use crate::visa::ResourceAddr;

/// One capability a registered instrument can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    RfSource,
    PowerSensor,
    SpectrumSweep,
    NetworkAnalyzer,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Matches the registry getter names so error messages point at the
        // call that failed.
        let name = match self {
            Capability::RfSource => "rf_source",
            Capability::PowerSensor => "power_sensor",
            Capability::SpectrumSweep => "spectrum",
            Capability::NetworkAnalyzer => "vna",
        };
        f.write_str(name)
    }
}

/// Driver selection plus its connection parameters, as written in an
/// `[[instruments]]` table of the bench config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverKind {
    /// Keysight PNA-X vector network analyzer.
    Pnax {
        /// VISA resource string, e.g. `TCPIP0::10.0.0.5::5025::SOCKET`.
        resource: String,
        /// Instrument-side directory used to stage screenshots.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        screenshot_dir: Option<String>,
    },
    /// Keysight X-Series signal analyzer.
    XseriesSa {
        /// VISA resource string.
        resource: String,
    },
    /// Rohde & Schwarz SMB100A signal generator.
    Smb100a {
        /// VISA resource string.
        resource: String,
    },
    /// Keysight N1913A EPM power meter.
    N1913a {
        /// VISA resource string.
        resource: String,
    },
    /// In-memory network analyzer with a synthesized notch response.
    MockVna,
    /// In-memory CW source.
    MockSource,
    /// In-memory power sensor.
    MockPowerSensor,
    /// In-memory spectrum analyzer with a synthesized tone.
    MockSpectrum,
}

impl DriverKind {
    /// Human-readable driver name for listings and logs.
    pub fn driver_name(&self) -> &'static str {
        match self {
            DriverKind::Pnax { .. } => "Keysight PNA-X",
            DriverKind::XseriesSa { .. } => "Keysight X-Series SA",
            DriverKind::Smb100a { .. } => "Rohde & Schwarz SMB100A",
            DriverKind::N1913a { .. } => "Keysight N1913A",
            DriverKind::MockVna => "mock VNA",
            DriverKind::MockSource => "mock source",
            DriverKind::MockPowerSensor => "mock power sensor",
            DriverKind::MockSpectrum => "mock spectrum analyzer",
        }
    }

    /// The capabilities this driver registers.
    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            DriverKind::Pnax { .. } | DriverKind::MockVna => &[Capability::NetworkAnalyzer],
            DriverKind::XseriesSa { .. } | DriverKind::MockSpectrum => {
                &[Capability::SpectrumSweep]
            }
            DriverKind::Smb100a { .. } | DriverKind::MockSource => &[Capability::RfSource],
            DriverKind::N1913a { .. } | DriverKind::MockPowerSensor => {
                &[Capability::PowerSensor]
            }
        }
    }

    /// The VISA resource string, for drivers that talk to hardware.
    pub fn resource(&self) -> Option<&str> {
        match self {
            DriverKind::Pnax { resource, .. }
            | DriverKind::XseriesSa { resource }
            | DriverKind::Smb100a { resource }
            | DriverKind::N1913a { resource } => Some(resource),
            DriverKind::MockVna
            | DriverKind::MockSource
            | DriverKind::MockPowerSensor
            | DriverKind::MockSpectrum => None,
        }
    }

    /// True for the in-memory drivers.
    pub fn is_mock(&self) -> bool {
        self.resource().is_none()
    }
}

/// A connected instrument and the capability handles it exposes.
pub struct RegisteredInstrument {
    driver_name: &'static str,
    capabilities: Vec<Capability>,
    identity: Option<Identity>,
    rf_source: Option<Arc<dyn RfSource>>,
    power_sensor: Option<Arc<dyn PowerSensor>>,
    spectrum: Option<Arc<dyn SpectrumSweep>>,
    vna: Option<Arc<dyn NetworkAnalyzer>>,
}

impl RegisteredInstrument {
    fn new(kind: &DriverKind, identity: Option<Identity>) -> Self {
        Self {
            driver_name: kind.driver_name(),
            capabilities: Vec::new(),
            identity,
            rf_source: None,
            power_sensor: None,
            spectrum: None,
            vna: None,
        }
    }

    /// An entry with no capabilities attached. Pair with the `with_*`
    /// builders to register a hand-built driver.
    pub fn custom(driver_name: &'static str, identity: Option<Identity>) -> Self {
        Self {
            driver_name,
            capabilities: Vec::new(),
            identity,
            rf_source: None,
            power_sensor: None,
            spectrum: None,
            vna: None,
        }
    }

    /// Attach an RF source handle.
    pub fn with_rf_source(mut self, source: Arc<dyn RfSource>) -> Self {
        self.rf_source = Some(source);
        self.capabilities.push(Capability::RfSource);
        self
    }

    /// Attach a power sensor handle.
    pub fn with_power_sensor(mut self, sensor: Arc<dyn PowerSensor>) -> Self {
        self.power_sensor = Some(sensor);
        self.capabilities.push(Capability::PowerSensor);
        self
    }

    /// Attach a spectrum analyzer handle.
    pub fn with_spectrum(mut self, spectrum: Arc<dyn SpectrumSweep>) -> Self {
        self.spectrum = Some(spectrum);
        self.capabilities.push(Capability::SpectrumSweep);
        self
    }

    /// Attach a network analyzer handle.
    pub fn with_vna(mut self, vna: Arc<dyn NetworkAnalyzer>) -> Self {
        self.vna = Some(vna);
        self.capabilities.push(Capability::NetworkAnalyzer);
        self
    }

    /// The `*IDN?` identity, when the driver captured one at connect.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Driver name as listed by [`DriverKind::driver_name`].
    pub fn driver_name(&self) -> &'static str {
        self.driver_name
    }

    /// The capabilities this instrument exposes.
    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }
}

/// Listing entry for one registered instrument.
#[derive(Debug, Clone, Serialize)]
pub struct InstrumentInfo {
    /// Bench-config id.
    pub id: String,
    /// Driver name.
    pub driver: String,
    /// Capabilities the instrument exposes.
    pub capabilities: Vec<Capability>,
    /// `*IDN?` identity, when connected hardware reported one.
    pub identity: Option<Identity>,
}

/// Instantiates and connects the driver a definition names.
///
/// Hardware drivers parse their resource string and open the SCPI session;
/// mock drivers are built in place. Does not touch the registry, so callers
/// can connect many definitions concurrently and insert afterwards.
pub async fn instantiate(definition: &InstrumentDefinition) -> BenchResult<RegisteredInstrument> {
    let timeout = definition.timeout;
    match &definition.driver {
        DriverKind::Pnax {
            resource,
            screenshot_dir,
        } => {
            let addr: ResourceAddr = resource.parse()?;
            let mut driver = PnaX::connect(&addr, timeout).await?;
            if let Some(dir) = screenshot_dir {
                driver = driver.with_screenshot_dir(dir.clone());
            }
            let identity = driver.identity().cloned();
            Ok(RegisteredInstrument::new(&definition.driver, identity)
                .with_vna(Arc::new(driver)))
        }
        DriverKind::XseriesSa { resource } => {
            let addr: ResourceAddr = resource.parse()?;
            let driver = XSeriesSa::connect(&addr, timeout).await?;
            let identity = driver.identity().cloned();
            Ok(RegisteredInstrument::new(&definition.driver, identity)
                .with_spectrum(Arc::new(driver)))
        }
        DriverKind::Smb100a { resource } => {
            let addr: ResourceAddr = resource.parse()?;
            let driver = Smb100a::connect(&addr, timeout).await?;
            let identity = driver.identity().cloned();
            Ok(RegisteredInstrument::new(&definition.driver, identity)
                .with_rf_source(Arc::new(driver)))
        }
        DriverKind::N1913a { resource } => {
            let addr: ResourceAddr = resource.parse()?;
            let driver = N1913a::connect(&addr, timeout).await?;
            let identity = driver.identity().cloned();
            Ok(RegisteredInstrument::new(&definition.driver, identity)
                .with_power_sensor(Arc::new(driver)))
        }
        DriverKind::MockVna => {
            let driver = MockVna::new();
            let identity = Some(driver.identity());
            Ok(RegisteredInstrument::new(&definition.driver, identity)
                .with_vna(Arc::new(driver)))
        }
        DriverKind::MockSource => {
            let driver = MockRfSource::default();
            let identity = Some(driver.identity());
            Ok(RegisteredInstrument::new(&definition.driver, identity)
                .with_rf_source(Arc::new(driver)))
        }
        DriverKind::MockPowerSensor => {
            let driver = MockPowerSensor::default();
            let identity = Some(driver.identity());
            Ok(RegisteredInstrument::new(&definition.driver, identity)
                .with_power_sensor(Arc::new(driver)))
        }
        DriverKind::MockSpectrum => {
            let driver = MockSpectrum::new();
            let identity = Some(driver.identity());
            Ok(RegisteredInstrument::new(&definition.driver, identity)
                .with_spectrum(Arc::new(driver)))
        }
    }
}

/// Connected instruments keyed by their bench-config id.
#[derive(Default)]
pub struct InstrumentRegistry {
    instruments: HashMap<String, RegisteredInstrument>,
}

impl InstrumentRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connected instrument under `id`. Duplicate ids are rejected.
    pub fn insert(
        &mut self,
        id: impl Into<String>,
        instrument: RegisteredInstrument,
    ) -> BenchResult<()> {
        let id = id.into();
        if self.instruments.contains_key(&id) {
            return Err(BenchError::Configuration(format!(
                "duplicate instrument id '{id}'"
            )));
        }
        info!(
            id = %id,
            driver = instrument.driver_name,
            "registered instrument"
        );
        self.instruments.insert(id, instrument);
        Ok(())
    }

    /// Connects the driver `definition` names and registers it.
    pub async fn register(&mut self, definition: &InstrumentDefinition) -> BenchResult<()> {
        let instrument = instantiate(definition).await?;
        self.insert(definition.id.clone(), instrument)
    }

    fn get(&self, id: &str) -> BenchResult<&RegisteredInstrument> {
        self.instruments
            .get(id)
            .ok_or_else(|| BenchError::UnknownInstrument(id.to_string()))
    }

    fn missing(id: &str, capability: Capability) -> BenchError {
        BenchError::CapabilityNotSupported {
            id: id.to_string(),
            capability: capability.to_string(),
        }
    }

    /// The RF source registered under `id`.
    pub fn rf_source(&self, id: &str) -> BenchResult<Arc<dyn RfSource>> {
        self.get(id)?
            .rf_source
            .clone()
            .ok_or_else(|| Self::missing(id, Capability::RfSource))
    }

    /// The power sensor registered under `id`.
    pub fn power_sensor(&self, id: &str) -> BenchResult<Arc<dyn PowerSensor>> {
        self.get(id)?
            .power_sensor
            .clone()
            .ok_or_else(|| Self::missing(id, Capability::PowerSensor))
    }

    /// The spectrum analyzer registered under `id`.
    pub fn spectrum(&self, id: &str) -> BenchResult<Arc<dyn SpectrumSweep>> {
        self.get(id)?
            .spectrum
            .clone()
            .ok_or_else(|| Self::missing(id, Capability::SpectrumSweep))
    }

    /// The network analyzer registered under `id`.
    pub fn vna(&self, id: &str) -> BenchResult<Arc<dyn NetworkAnalyzer>> {
        self.get(id)?
            .vna
            .clone()
            .ok_or_else(|| Self::missing(id, Capability::NetworkAnalyzer))
    }

    /// Whether an instrument is registered under `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.instruments.contains_key(id)
    }

    /// Number of registered instruments.
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// Everything registered, sorted by id.
    pub fn list(&self) -> Vec<InstrumentInfo> {
        let mut infos: Vec<InstrumentInfo> = self
            .instruments
            .iter()
            .map(|(id, instrument)| InstrumentInfo {
                id: id.clone(),
                driver: instrument.driver_name.to_string(),
                capabilities: instrument.capabilities.clone(),
                identity: instrument.identity.clone(),
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Turns off every RF output, attempting all instruments even after a
    /// failure. Returns the failures collected along the way.
    pub async fn quiesce(&self) -> Vec<BenchError> {
        let mut failures = Vec::new();
        for (id, instrument) in &self.instruments {
            if let Some(source) = &instrument.rf_source {
                if let Err(e) = source.set_output(false).await {
                    failures.push(BenchError::Driver(
                        e.context(format!("disabling RF output of '{id}'")),
                    ));
                }
            }
            if let Some(vna) = &instrument.vna {
                if let Err(e) = vna.set_output(false).await {
                    failures.push(BenchError::Driver(
                        e.context(format!("disabling stimulus output of '{id}'")),
                    ));
                }
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn mock_definition(id: &str, driver: DriverKind) -> InstrumentDefinition {
        InstrumentDefinition {
            id: id.to_string(),
            driver,
            enabled: true,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn driver_kind_deserializes_from_config_tables() {
        let kind: DriverKind = toml::from_str(
            "type = \"pnax\"\nresource = \"TCPIP0::10.0.0.5::5025::SOCKET\"\n",
        )
        .unwrap();
        assert_eq!(
            kind,
            DriverKind::Pnax {
                resource: "TCPIP0::10.0.0.5::5025::SOCKET".to_string(),
                screenshot_dir: None,
            }
        );
        assert_eq!(kind.resource(), Some("TCPIP0::10.0.0.5::5025::SOCKET"));
        assert!(!kind.is_mock());

        let kind: DriverKind = toml::from_str("type = \"mock_vna\"\n").unwrap();
        assert_eq!(kind, DriverKind::MockVna);
        assert!(kind.is_mock());
    }

    #[test]
    fn capabilities_match_driver_role() {
        assert_eq!(
            DriverKind::MockVna.capabilities(),
            &[Capability::NetworkAnalyzer]
        );
        assert_eq!(
            DriverKind::Smb100a {
                resource: "10.0.0.9:5025".into()
            }
            .capabilities(),
            &[Capability::RfSource]
        );
        assert_eq!(Capability::SpectrumSweep.to_string(), "spectrum");
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let mut registry = InstrumentRegistry::new();
        registry
            .register(&mock_definition("src", DriverKind::MockSource))
            .await
            .unwrap();
        let err = registry
            .register(&mock_definition("src", DriverKind::MockSource))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("duplicate instrument id 'src'"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn getters_enforce_registration_and_capability() {
        let mut registry = InstrumentRegistry::new();
        registry
            .register(&mock_definition("src", DriverKind::MockSource))
            .await
            .unwrap();

        let source = registry.rf_source("src").unwrap();
        source.set_frequency(1.0e9).await.unwrap();

        match registry.vna("src").err() {
            Some(BenchError::CapabilityNotSupported { id, capability }) => {
                assert_eq!(id, "src");
                assert_eq!(capability, "vna");
            }
            other => panic!("expected capability error, got {other:?}"),
        }
        match registry.rf_source("nope").err() {
            Some(BenchError::UnknownInstrument(id)) => assert_eq!(id, "nope"),
            other => panic!("expected unknown-instrument error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_is_sorted_and_carries_identity() {
        let mut registry = InstrumentRegistry::new();
        registry
            .register(&mock_definition("zeta", DriverKind::MockSource))
            .await
            .unwrap();
        registry
            .register(&mock_definition("alpha", DriverKind::MockVna))
            .await
            .unwrap();

        let infos = registry.list();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].id, "alpha");
        assert_eq!(infos[0].driver, "mock VNA");
        assert_eq!(infos[0].capabilities, vec![Capability::NetworkAnalyzer]);
        assert_eq!(
            infos[0].identity.as_ref().map(|i| i.model.as_str()),
            Some("MockVNA")
        );
        assert_eq!(infos[1].id, "zeta");
    }

    #[tokio::test]
    async fn quiesce_turns_outputs_off() {
        let mut registry = InstrumentRegistry::new();
        registry
            .register(&mock_definition("src", DriverKind::MockSource))
            .await
            .unwrap();
        let source = registry.rf_source("src").unwrap();
        source.set_output(true).await.unwrap();

        let failures = registry.quiesce().await;
        assert!(failures.is_empty());
        assert!(!source.output().await.unwrap());
    }
}

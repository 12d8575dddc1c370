//! Bench configuration.
//!
//! Configuration is loaded with figment from two sources, later ones
//! overriding earlier:
//! 1. A TOML file (`config/bench.toml` by default)
//! 2. Environment variables prefixed with `RF_BENCH_`, with `__` separating
//!    nesting levels
//!
//! # Example
//! ```no_run
//! use rf_bench::config::BenchConfig;
//!
//! # fn main() -> rf_bench::error::BenchResult<()> {
//! let config = BenchConfig::load_from("config/bench.toml")?;
//! config.validate()?;
//! println!("bench: {}", config.application.name);
//! # Ok(())
//! # }
//! ```
//!
//! `RF_BENCH_APPLICATION__LOG_LEVEL=debug` overrides `[application]
//! log_level`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{BenchError, BenchResult};
use crate::instruments::registry::DriverKind;
use crate::visa::ResourceAddr;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "RF_BENCH_";

/// Top-level bench configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Application settings.
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Output file settings.
    #[serde(default)]
    pub output: OutputConfig,
    /// Instrument definitions.
    #[serde(default)]
    pub instruments: Vec<InstrumentDefinition>,
}

/// Application-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Bench name, used in log output and export banners.
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Output file configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory for exported traces, screenshots, and monitor logs.
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
}

/// One instrument entry in configuration.
///
/// The driver table is flattened, so TOML reads naturally:
///
/// ```toml
/// [[instruments]]
/// id = "vna"
/// type = "pnax"
/// resource = "TCPIP0::10.0.0.5::5025::SOCKET"
/// timeout = "10s"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentDefinition {
    /// Unique instrument identifier, referenced by scripts and the CLI.
    pub id: String,
    /// Driver selection and its connection parameters.
    #[serde(flatten)]
    pub driver: DriverKind,
    /// Whether this instrument is connected at bench start.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// SCPI response timeout, as a humantime string ("5s", "500ms").
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
}

impl InstrumentDefinition {
    /// A definition with defaults: enabled, 5 s timeout.
    pub fn new(id: impl Into<String>, driver: DriverKind) -> Self {
        Self {
            id: id.into(),
            driver,
            enabled: default_enabled(),
            timeout: default_timeout(),
        }
    }
}

fn default_name() -> String {
    "rf-bench".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_directory() -> PathBuf {
    PathBuf::from("data")
}

fn default_enabled() -> bool {
    true
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
        }
    }
}

impl BenchConfig {
    /// The conventional config location: `$XDG_CONFIG_HOME/rf-bench/bench.toml`
    /// (or the platform equivalent), falling back to `config/bench.toml` in
    /// the working directory.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("rf-bench").join("bench.toml"))
            .unwrap_or_else(|| PathBuf::from("config").join("bench.toml"))
    }

    /// Load configuration from the default path and environment variables.
    pub fn load() -> BenchResult<Self> {
        Self::load_from(Self::default_path())
    }

    /// Load configuration from a specific file path, then apply environment
    /// overrides.
    pub fn load_from<P: AsRef<Path>>(path: P) -> BenchResult<Self> {
        let config = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> BenchResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(BenchError::Configuration(format!(
                "invalid log_level '{}', must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let mut ids = HashSet::new();
        for instrument in &self.instruments {
            if instrument.id.trim().is_empty() {
                return Err(BenchError::Configuration(
                    "instrument id must not be empty".to_string(),
                ));
            }
            if !ids.insert(&instrument.id) {
                return Err(BenchError::Configuration(format!(
                    "duplicate instrument id '{}'",
                    instrument.id
                )));
            }
            if let Some(resource) = instrument.driver.resource() {
                resource.parse::<ResourceAddr>().map_err(|e| {
                    BenchError::Configuration(format!(
                        "instrument '{}': {e}",
                        instrument.id
                    ))
                })?;
            }
        }

        Ok(())
    }

    /// All instruments marked enabled.
    pub fn enabled_instruments(&self) -> Vec<&InstrumentDefinition> {
        self.instruments
            .iter()
            .filter(|instrument| instrument.enabled)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const SAMPLE: &str = r#"
[application]
name = "anechoic-bench"
log_level = "debug"

[output]
directory = "runs"

[[instruments]]
id = "vna"
type = "pnax"
resource = "TCPIP0::10.0.0.5::5025::SOCKET"
timeout = "10s"

[[instruments]]
id = "sig_gen"
type = "smb100a"
resource = "10.0.0.9:5025"
enabled = false

[[instruments]]
id = "sim"
type = "mock_vna"
"#;

    fn parse(doc: &str) -> BenchConfig {
        Figment::new()
            .merge(Toml::string(doc))
            .extract()
            .unwrap()
    }

    #[test]
    fn parses_full_document() {
        let config = parse(SAMPLE);
        assert_eq!(config.application.name, "anechoic-bench");
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.output.directory, PathBuf::from("runs"));
        assert_eq!(config.instruments.len(), 3);

        let vna = &config.instruments[0];
        assert_eq!(vna.id, "vna");
        assert_eq!(vna.timeout, Duration::from_secs(10));
        assert!(vna.enabled);
        assert_eq!(
            vna.driver.resource(),
            Some("TCPIP0::10.0.0.5::5025::SOCKET")
        );

        let sig_gen = &config.instruments[1];
        assert!(!sig_gen.enabled);
        assert_eq!(sig_gen.timeout, default_timeout());

        assert!(config.instruments[2].driver.is_mock());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config = parse("");
        assert_eq!(config.application.name, "rf-bench");
        assert_eq!(config.application.log_level, "info");
        assert_eq!(config.output.directory, PathBuf::from("data"));
        assert!(config.instruments.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_log_level() {
        let mut config = parse(SAMPLE);
        config.application.log_level = "verbose".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("invalid log_level 'verbose'"));
    }

    #[test]
    fn validate_rejects_duplicate_and_empty_ids() {
        let mut config = parse(SAMPLE);
        config.instruments[1].id = "vna".to_string();
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("duplicate instrument id 'vna'"));

        let mut config = parse(SAMPLE);
        config.instruments[0].id = "  ".to_string();
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("must not be empty"));
    }

    #[test]
    fn validate_rejects_unparseable_resource() {
        let config = parse(
            r#"
[[instruments]]
id = "vna"
type = "pnax"
resource = ""
"#,
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("instrument 'vna'"));
    }

    #[test]
    fn enabled_instruments_filters_disabled_entries() {
        let config = parse(SAMPLE);
        let enabled = config.enabled_instruments();
        assert_eq!(enabled.len(), 2);
        assert!(enabled.iter().all(|i| i.id != "sig_gen"));
    }

    #[test]
    #[serial]
    fn env_variables_override_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        std::env::set_var("RF_BENCH_APPLICATION__LOG_LEVEL", "warn");
        let loaded = BenchConfig::load_from(&path);
        std::env::remove_var("RF_BENCH_APPLICATION__LOG_LEVEL");

        let config = loaded.unwrap();
        assert_eq!(config.application.log_level, "warn");
        assert_eq!(config.application.name, "anechoic-bench");
        assert_eq!(config.instruments.len(), 3);
    }

    #[test]
    fn unknown_driver_type_is_an_error() {
        let result: Result<BenchConfig, _> = Figment::new()
            .merge(Toml::string(
                r#"
[[instruments]]
id = "vna"
type = "pna_y"
resource = "10.0.0.5:5025"
"#,
            ))
            .extract();
        assert!(result.is_err());
    }
}

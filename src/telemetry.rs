//! Tracing setup.
//!
//! Structured logging for the bench using `tracing` and `tracing-subscriber`:
//! pretty, compact, or JSON output, `RUST_LOG`-style environment filtering,
//! and a level taken from the application config. Initialization is
//! idempotent so tests and embedding applications can call it freely.
//!
//! # Example
//! ```no_run
//! use rf_bench::telemetry::{self, OutputFormat, TelemetryConfig};
//! use tracing::Level;
//!
//! # fn main() -> rf_bench::error::BenchResult<()> {
//! let config = TelemetryConfig::new(Level::DEBUG).with_format(OutputFormat::Compact);
//! telemetry::init(config)?;
//! tracing::info!("bench up");
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self as tracing_fmt, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::config::BenchConfig;
use crate::error::{BenchError, BenchResult};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Pretty-printed with colors, for interactive use.
    Pretty,
    /// Single-line compact output without colors.
    Compact,
    /// JSON lines for log aggregation.
    Json,
}

impl FromStr for OutputFormat {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(OutputFormat::Pretty),
            "compact" => Ok(OutputFormat::Compact),
            "json" => Ok(OutputFormat::Json),
            other => Err(BenchError::Configuration(format!(
                "invalid log format '{other}', must be one of: pretty, compact, json"
            ))),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputFormat::Pretty => "pretty",
            OutputFormat::Compact => "compact",
            OutputFormat::Json => "json",
        };
        f.write_str(name)
    }
}

/// Tracing configuration options.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Log level when `RUST_LOG` is not set.
    pub level: Level,
    /// Output format.
    pub format: OutputFormat,
    /// Whether to emit span open/close events.
    pub with_span_events: bool,
    /// Whether to include file and line numbers.
    pub with_file_and_line: bool,
    /// Whether to include thread names.
    pub with_thread_names: bool,
    /// Whether to enable ANSI colors (pretty format only).
    pub with_ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            with_span_events: false,
            with_file_and_line: false,
            with_thread_names: true,
            with_ansi: true,
        }
    }
}

impl TelemetryConfig {
    /// Telemetry config with the given level and default formatting.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Telemetry config from the application section of the bench config.
    pub fn from_config(config: &BenchConfig) -> BenchResult<Self> {
        let level = parse_log_level(&config.application.log_level)?;
        Ok(Self::new(level))
    }

    /// Set the output format.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable span open/close events.
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// Enable or disable ANSI colors.
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Calling this a
/// second time is a no-op, not an error.
pub fn init(config: TelemetryConfig) -> BenchResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_ascii_lowercase()));

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    match config.format {
        OutputFormat::Pretty => {
            let fmt_layer = tracing_fmt::layer()
                .pretty()
                .with_span_events(span_events)
                .with_file(config.with_file_and_line)
                .with_line_number(config.with_file_and_line)
                .with_thread_names(config.with_thread_names)
                .with_ansi(config.with_ansi)
                .with_filter(env_filter);
            finish(tracing_subscriber::registry().with(fmt_layer).try_init())
        }
        OutputFormat::Compact => {
            let fmt_layer = tracing_fmt::layer()
                .compact()
                .with_span_events(span_events)
                .with_file(config.with_file_and_line)
                .with_line_number(config.with_file_and_line)
                .with_thread_names(config.with_thread_names)
                .with_ansi(false)
                .with_filter(env_filter);
            finish(tracing_subscriber::registry().with(fmt_layer).try_init())
        }
        OutputFormat::Json => {
            let fmt_layer = tracing_fmt::layer()
                .json()
                .with_span_events(span_events)
                .with_file(config.with_file_and_line)
                .with_line_number(config.with_file_and_line)
                .with_thread_names(config.with_thread_names)
                .with_filter(env_filter);
            finish(tracing_subscriber::registry().with(fmt_layer).try_init())
        }
    }
}

/// Initialize tracing straight from a bench config.
pub fn init_from_config(config: &BenchConfig) -> BenchResult<()> {
    init(TelemetryConfig::from_config(config)?)
}

fn finish<E: fmt::Display>(result: Result<(), E>) -> BenchResult<()> {
    match result {
        Ok(()) => Ok(()),
        // The subscriber is process-global; a second init finds it set.
        Err(e) if e.to_string().contains("already been set") => Ok(()),
        Err(e) => Err(BenchError::Configuration(format!(
            "failed to initialize tracing: {e}"
        ))),
    }
}

/// Parse a log level string into a tracing [`Level`].
pub fn parse_log_level(level: &str) -> BenchResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(BenchError::Configuration(format!(
            "invalid log level '{other}', must be one of: trace, debug, info, warn, error"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_log_level_accepts_known_levels() {
        assert_eq!(parse_log_level("trace").unwrap(), Level::TRACE);
        assert_eq!(parse_log_level("INFO").unwrap(), Level::INFO);
        assert_eq!(parse_log_level("Warn").unwrap(), Level::WARN);
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn output_format_parses_and_displays() {
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!(
            "Pretty".parse::<OutputFormat>().unwrap(),
            OutputFormat::Pretty
        );
        assert!("plain".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::Compact.to_string(), "compact");
    }

    #[test]
    fn config_builder_sets_fields() {
        let config = TelemetryConfig::new(Level::WARN)
            .with_format(OutputFormat::Json)
            .with_span_events(true)
            .with_ansi(false);
        assert_eq!(config.level, Level::WARN);
        assert_eq!(config.format, OutputFormat::Json);
        assert!(config.with_span_events);
        assert!(!config.with_ansi);
    }

    #[test]
    fn from_config_reads_application_level() {
        let mut bench = BenchConfig::default();
        bench.application.log_level = "debug".to_string();
        let config = TelemetryConfig::from_config(&bench).unwrap();
        assert_eq!(config.level, Level::DEBUG);
    }

    #[test]
    fn init_is_idempotent() {
        let config = TelemetryConfig::new(Level::ERROR).with_format(OutputFormat::Compact);
        init(config.clone()).unwrap();
        init(config).unwrap();
    }
}

//! CLI entry point for rf-bench.
//!
//! Provides command-line access to the bench:
//! - `run`: evaluate a Rhai automation script against the configured bench
//! - `idn`: identify a single instrument by resource address
//! - `sweep`: one-shot S-parameter sweep on a PNA-X, with optional export
//! - `monitor`: log power sensor readings at a fixed interval
//!
//! # Usage
//!
//! Run a script against mock instruments:
//! ```bash
//! rf-bench run scripts/gain_sweep.rhai --mock
//! ```
//!
//! Identify whatever answers on a socket:
//! ```bash
//! rf-bench idn --resource "TCPIP0::10.0.0.40::5025::SOCKET"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, Level};

use rf_bench::bench::Bench;
use rf_bench::config::BenchConfig;
use rf_bench::instruments::{NetworkAnalyzer, PnaX};
#[cfg(feature = "storage_csv")]
use rf_bench::measurement::storage::{self, PowerLog};
use rf_bench::measurement::{touchstone, ComplexTrace, SParameter, SweepPlan};
use rf_bench::scpi::ScpiSession;
use rf_bench::scripting::{bench_scope, ScriptHost};
use rf_bench::telemetry::{self, OutputFormat, TelemetryConfig};
use rf_bench::visa::ResourceAddr;

#[derive(Parser)]
#[command(name = "rf-bench")]
#[command(about = "Scriptable RF test bench over SCPI instruments", long_about = None)]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format (pretty, compact, json)
    #[arg(long, global = true, default_value = "pretty")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a Rhai automation script against the bench
    Run(RunArgs),
    /// Query *IDN? on a single resource and print the identity
    Idn(IdnArgs),
    /// One-shot S-parameter sweep on a PNA-X
    Sweep(SweepArgs),
    /// Read a power sensor at a fixed interval until stopped
    Monitor(MonitorArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Path to the .rhai script
    script: PathBuf,

    /// Bench config file (defaults to the user config path)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use mock instruments instead of the configured hardware
    #[arg(long)]
    mock: bool,
}

#[derive(Args)]
struct IdnArgs {
    /// VISA-style resource, e.g. "TCPIP0::10.0.0.40::5025::SOCKET"
    #[arg(long)]
    resource: String,

    /// Response timeout
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
    timeout: Duration,

    /// Print the identity as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct SweepArgs {
    /// VISA-style resource of the analyzer
    #[arg(long)]
    resource: String,

    /// S-parameter to measure
    #[arg(long, default_value = "S21")]
    param: SParameter,

    /// Start frequency in Hz
    #[arg(long)]
    start: f64,

    /// Stop frequency in Hz
    #[arg(long)]
    stop: f64,

    /// Number of sweep points
    #[arg(long, default_value_t = 201)]
    points: usize,

    /// Source power in dBm (instrument default if omitted)
    #[arg(long)]
    power: Option<f64>,

    /// Response timeout
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    timeout: Duration,

    /// Write the measured trace to a CSV file
    #[cfg(feature = "storage_csv")]
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Acquire all four S-parameters and write a Touchstone .s2p file
    #[arg(long)]
    s2p: Option<PathBuf>,
}

#[derive(Args)]
struct MonitorArgs {
    /// Instrument id from the bench config
    #[arg(long)]
    id: String,

    /// Bench config file (defaults to the user config path)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Delay between readings
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    interval: Duration,

    /// Stop after this many readings (run until Ctrl+C if omitted)
    #[arg(long)]
    samples: Option<u64>,

    /// Append timestamped readings to a CSV file
    #[cfg(feature = "storage_csv")]
    #[arg(long)]
    csv: Option<PathBuf>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(ref args) => {
            let config = load_config(args.config.clone())?;
            init_telemetry(&cli, Some(&config))?;
            run_script(args, config).await
        }
        Commands::Idn(ref args) => {
            init_telemetry(&cli, None)?;
            identify(args).await
        }
        Commands::Sweep(ref args) => {
            init_telemetry(&cli, None)?;
            sweep(args).await
        }
        Commands::Monitor(ref args) => {
            init_telemetry(&cli, None)?;
            monitor(args).await
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<BenchConfig> {
    match path {
        Some(path) => BenchConfig::load_from(&path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => BenchConfig::load().context("loading default config"),
    }
}

fn init_telemetry(cli: &Cli, config: Option<&BenchConfig>) -> Result<()> {
    let level = match (&cli.log_level, config) {
        (Some(level), _) => telemetry::parse_log_level(level)?,
        (None, Some(config)) => telemetry::parse_log_level(&config.application.log_level)?,
        (None, None) => Level::INFO,
    };
    let format: OutputFormat = cli.log_format.parse()?;
    telemetry::init(TelemetryConfig::new(level).with_format(format))?;
    Ok(())
}

async fn run_script(args: &RunArgs, config: BenchConfig) -> Result<()> {
    let source = tokio::fs::read_to_string(&args.script)
        .await
        .with_context(|| format!("reading script {}", args.script.display()))?;

    let host = ScriptHost::new();
    host.validate(&source)
        .with_context(|| format!("compiling {}", args.script.display()))?;

    let bench = if args.mock {
        info!("using mock instruments");
        Bench::mock().await?
    } else {
        Bench::from_config(config).await?
    };

    let mut scope = bench_scope(&bench);
    info!(script = %args.script.display(), "running script");
    let outcome = host.run_with_scope(&mut scope, &source);

    // Outputs must go off even when the script failed.
    let shutdown = bench.shutdown().await;

    match outcome {
        Ok(value) => {
            if !value.is_unit() {
                println!("script result: {value}");
            }
            shutdown?;
            Ok(())
        }
        Err(e) => {
            if shutdown.is_err() {
                error!("bench shutdown failed after script error");
            }
            Err(e.into())
        }
    }
}

async fn identify(args: &IdnArgs) -> Result<()> {
    let addr: ResourceAddr = args.resource.parse()?;
    let session = ScpiSession::connect(&addr, args.timeout).await?;
    let identity = session.identify().await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&identity)?);
    } else {
        println!("{identity}");
    }
    Ok(())
}

async fn sweep(args: &SweepArgs) -> Result<()> {
    let addr: ResourceAddr = args.resource.parse()?;
    let plan = SweepPlan::new(args.start, args.stop, args.points)?;
    let vna = PnaX::connect(&addr, args.timeout).await?;

    vna.preset().await?;
    vna.configure_sweep(&plan).await?;
    if let Some(dbm) = args.power {
        vna.set_source_power(dbm).await?;
    }
    sweep_with_output(&vna, args).await
}

/// Runs the measurement section with the stimulus on. The stimulus must go
/// off again even when acquisition or export failed.
async fn sweep_with_output(vna: &PnaX, args: &SweepArgs) -> Result<()> {
    vna.set_output(true).await?;
    let outcome = measure_and_export(vna, args).await;
    let parked = vna.set_output(false).await;

    match outcome {
        Ok(()) => parked,
        Err(e) => {
            if parked.is_err() {
                error!("stimulus output still on after sweep error");
            }
            Err(e)
        }
    }
}

async fn measure_and_export(vna: &PnaX, args: &SweepArgs) -> Result<()> {
    let trace = acquire_param(vna, args.param).await?;
    let (peak_hz, peak_db) = trace.peak_db();
    let (min_hz, min_db) = trace.minimum_db();
    println!(
        "{}: {} points, peak {peak_db:.2} dB at {:.6} GHz, minimum {min_db:.2} dB at {:.6} GHz",
        args.param,
        trace.len(),
        peak_hz / 1e9,
        min_hz / 1e9,
    );

    #[cfg(feature = "storage_csv")]
    if let Some(path) = &args.csv {
        storage::write_complex_trace_csv(path, &trace)?;
        println!("trace written to {}", path.display());
    }

    if let Some(path) = &args.s2p {
        vna.clear_measurements().await?;
        let s11 = acquire_param(vna, SParameter::S11).await?;
        let s21 = acquire_param(vna, SParameter::S21).await?;
        let s12 = acquire_param(vna, SParameter::S12).await?;
        let s22 = acquire_param(vna, SParameter::S22).await?;
        let sweep = touchstone::TwoPortSweep::new(s11, s21, s12, s22)?;
        touchstone::write_s2p(path, &sweep)?;
        println!("two-port data written to {}", path.display());
    }
    Ok(())
}

async fn acquire_param(vna: &PnaX, param: SParameter) -> Result<ComplexTrace> {
    let name = param.to_string();
    vna.define_measurement(&name, param).await?;
    vna.acquire(&name).await
}

async fn monitor(args: &MonitorArgs) -> Result<()> {
    let config = load_config(args.config.clone())?;
    let bench = Bench::from_config(config).await?;
    let outcome = monitor_loop(&bench, args).await;
    let shutdown = bench.shutdown().await;
    outcome?;
    shutdown?;
    Ok(())
}

async fn monitor_loop(bench: &Bench, args: &MonitorArgs) -> Result<()> {
    let sensor = bench.registry().power_sensor(&args.id)?;

    #[cfg(feature = "storage_csv")]
    let mut log = match &args.csv {
        Some(path) => {
            let log = PowerLog::create(path)?;
            println!("logging to {}", path.display());
            Some(log)
        }
        None => None,
    };

    let mut taken: u64 = 0;
    loop {
        let dbm = sensor.read_dbm().await?;
        println!("{dbm:+.3} dBm");
        #[cfg(feature = "storage_csv")]
        if let Some(log) = log.as_mut() {
            log.append(dbm)?;
        }

        taken += 1;
        if let Some(limit) = args.samples {
            if taken >= limit {
                break;
            }
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!(readings = taken, "monitor interrupted");
                break;
            }
            _ = tokio::time::sleep(args.interval) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rf_bench::visa::MockTransport;

    const NO_ERROR: &str = "+0,\"No error\"";

    fn vna(mock: MockTransport) -> PnaX {
        PnaX::over(ScpiSession::over(
            Box::new(mock),
            Duration::from_millis(200),
            "mock-pnax",
        ))
    }

    fn sweep_args() -> SweepArgs {
        SweepArgs {
            resource: "mock".into(),
            param: SParameter::S21,
            start: 1.0e9,
            stop: 2.0e9,
            points: 3,
            power: None,
            timeout: Duration::from_millis(200),
            #[cfg(feature = "storage_csv")]
            csv: None,
            s2p: None,
        }
    }

    #[tokio::test]
    async fn sweep_with_output_parks_stimulus_on_success() {
        let mock = MockTransport::new()
            .expect("OUTP ON")
            .expect_reply("SYST:ERR?", NO_ERROR)
            .expect("CALC:PAR:DEF 'S21',S21")
            .expect("DISP:WIND:TRAC1:FEED 'S21'")
            .expect_reply("SYST:ERR?", NO_ERROR)
            .expect("CALC:PAR:SEL 'S21'")
            .expect("INIT:IMM")
            .expect_reply("*OPC?", "1")
            .expect("FORM:DATA ASC,0")
            .expect_reply("CALC:DATA? SDATA", "0.5,0.0,0.25,-0.25,0.1,0.0")
            .expect_reply("SENS:FREQ:STAR?", "+1.00000000E+09")
            .expect_reply("SENS:FREQ:STOP?", "+2.00000000E+09")
            .expect_reply("SENS:SWE:POIN?", "+3")
            .expect("OUTP OFF")
            .expect_reply("SYST:ERR?", NO_ERROR);
        let probe = mock.clone();
        let vna = vna(mock);
        sweep_with_output(&vna, &sweep_args()).await.unwrap();
        assert!(probe.finished());
    }

    #[tokio::test]
    async fn sweep_with_output_parks_stimulus_when_acquisition_fails() {
        let mock = MockTransport::new()
            .expect("OUTP ON")
            .expect_reply("SYST:ERR?", NO_ERROR)
            .expect("CALC:PAR:DEF 'S21',S21")
            .expect("DISP:WIND:TRAC1:FEED 'S21'")
            .expect_reply("SYST:ERR?", NO_ERROR)
            .expect("CALC:PAR:SEL 'S21'")
            .expect("INIT:IMM")
            .expect_reply("*OPC?", "1")
            .expect("FORM:DATA ASC,0")
            .expect_reply("CALC:DATA? SDATA", "not-a-number")
            .expect("OUTP OFF")
            .expect_reply("SYST:ERR?", NO_ERROR);
        let probe = mock.clone();
        let vna = vna(mock);
        let err = sweep_with_output(&vna, &sweep_args()).await.unwrap_err();
        assert!(err.to_string().contains("S21"));
        assert!(probe.finished(), "stimulus was left on after the error");
    }
}

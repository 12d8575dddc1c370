//! Instrument bindings for Rhai scripts.
//!
//! Bridges the async capability traits into synchronous script calls. Each
//! handle wraps an `Arc<dyn Trait>` and executes driver methods through
//! `tokio::task::block_in_place`, so scripts read linearly:
//!
//! ```rhai
//! sig_gen.set_frequency(2.45e9);
//! sig_gen.set_level(-10.0);
//! sig_gen.output_on();
//! let power = sensor.read_dbm();
//! print("measured " + power + " dBm");
//! ```
//!
//! This requires a multi-thread tokio runtime; `block_in_place` panics on a
//! current-thread runtime.
//!
//! [`bench_scope`] builds a scope holding one handle per registered
//! instrument, named by its config id, so scripts address hardware the same
//! way the config file does.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rhai::{Dynamic, Engine, EvalAltResult, Position, Scope};
use tokio::runtime::Handle;
use tokio::task::block_in_place;
use tracing::warn;

use crate::bench::Bench;
use crate::instruments::capabilities::{NetworkAnalyzer, PowerSensor, RfSource};
use crate::instruments::mock::{MockPowerSensor, MockRfSource, MockVna};
use crate::instruments::registry::Capability;
#[cfg(feature = "storage_csv")]
use crate::measurement::storage;
use crate::measurement::{linspace, touchstone, ComplexTrace, SParameter, SweepPlan, TwoPortSweep};

/// Handle to an RF source for use in scripts.
///
/// # Script Example
/// ```rhai
/// sig_gen.set_frequency(1.0e9);
/// sig_gen.set_level(-20.0);
/// sig_gen.output_on();
/// ```
#[derive(Clone)]
pub struct SourceHandle {
    /// Driver behind the handle; cheap to clone, shared across scripts.
    pub driver: Arc<dyn RfSource>,
}

/// Handle to a power sensor for use in scripts.
///
/// # Script Example
/// ```rhai
/// sensor.set_frequency(1.0e9);
/// let dbm = sensor.read_dbm();
/// ```
#[derive(Clone)]
pub struct SensorHandle {
    /// Driver behind the handle; cheap to clone, shared across scripts.
    pub driver: Arc<dyn PowerSensor>,
}

#[derive(Default)]
struct VnaScriptState {
    defined: HashSet<String>,
    last_trace: Option<ComplexTrace>,
}

/// Handle to a network analyzer for use in scripts.
///
/// Measurements are defined on demand: `acquire("S21")` creates a
/// measurement named `S21` the first time and reuses it afterwards.
///
/// # Script Example
/// ```rhai
/// vna.sweep(1.0e9, 2.0e9, 201);
/// let db = vna.acquire("S21");
/// vna.save_s2p("runs/dut.s2p");
/// ```
#[derive(Clone)]
pub struct VnaHandle {
    /// Driver behind the handle; cheap to clone, shared across scripts.
    pub driver: Arc<dyn NetworkAnalyzer>,
    state: Arc<Mutex<VnaScriptState>>,
}

impl VnaHandle {
    /// Wraps a network analyzer driver.
    pub fn new(driver: Arc<dyn NetworkAnalyzer>) -> Self {
        Self {
            driver,
            state: Arc::new(Mutex::new(VnaScriptState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, VnaScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_measurement(&self, parameter: SParameter) -> anyhow::Result<String> {
        let name = parameter.to_string();
        if self.state().defined.contains(&name) {
            return Ok(name);
        }
        block_in_place(|| {
            Handle::current().block_on(self.driver.define_measurement(&name, parameter))
        })?;
        self.state().defined.insert(name.clone());
        Ok(name)
    }

    fn acquire_param(&self, param: &str) -> anyhow::Result<ComplexTrace> {
        let parameter: SParameter = param.parse()?;
        let name = self.ensure_measurement(parameter)?;
        let trace = block_in_place(|| Handle::current().block_on(self.driver.acquire(&name)))?;
        self.state().last_trace = Some(trace.clone());
        Ok(trace)
    }

    fn two_port(&self) -> anyhow::Result<TwoPortSweep> {
        let s11 = self.acquire_param("S11")?;
        let s21 = self.acquire_param("S21")?;
        let s12 = self.acquire_param("S12")?;
        let s22 = self.acquire_param("S22")?;
        Ok(TwoPortSweep::new(s11, s21, s12, s22)?)
    }
}

fn runtime_err(message: impl Into<String>) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(
        message.into().into(),
        Position::NONE,
    ))
}

/// Register the handle types, utility functions, and mock factories.
pub fn register_bench(engine: &mut Engine) {
    engine.register_type_with_name::<SourceHandle>("Source");
    engine.register_type_with_name::<SensorHandle>("Sensor");
    engine.register_type_with_name::<VnaHandle>("Vna");

    // -- RF source ----------------------------------------------------------

    engine.register_fn(
        "set_frequency",
        |source: &mut SourceHandle, hz: f64| -> Result<Dynamic, Box<EvalAltResult>> {
            block_in_place(|| Handle::current().block_on(source.driver.set_frequency(hz)))
                .map_err(|e| runtime_err(format!("set_frequency failed: {e}")))?;
            Ok(Dynamic::UNIT)
        },
    );

    engine.register_fn(
        "frequency",
        |source: &mut SourceHandle| -> Result<f64, Box<EvalAltResult>> {
            block_in_place(|| Handle::current().block_on(source.driver.frequency()))
                .map_err(|e| runtime_err(format!("frequency query failed: {e}")))
        },
    );

    engine.register_fn(
        "set_level",
        |source: &mut SourceHandle, dbm: f64| -> Result<Dynamic, Box<EvalAltResult>> {
            block_in_place(|| Handle::current().block_on(source.driver.set_level_dbm(dbm)))
                .map_err(|e| runtime_err(format!("set_level failed: {e}")))?;
            Ok(Dynamic::UNIT)
        },
    );

    engine.register_fn(
        "level",
        |source: &mut SourceHandle| -> Result<f64, Box<EvalAltResult>> {
            block_in_place(|| Handle::current().block_on(source.driver.level_dbm()))
                .map_err(|e| runtime_err(format!("level query failed: {e}")))
        },
    );

    engine.register_fn(
        "output_on",
        |source: &mut SourceHandle| -> Result<Dynamic, Box<EvalAltResult>> {
            block_in_place(|| Handle::current().block_on(source.driver.set_output(true)))
                .map_err(|e| runtime_err(format!("output_on failed: {e}")))?;
            Ok(Dynamic::UNIT)
        },
    );

    engine.register_fn(
        "output_off",
        |source: &mut SourceHandle| -> Result<Dynamic, Box<EvalAltResult>> {
            block_in_place(|| Handle::current().block_on(source.driver.set_output(false)))
                .map_err(|e| runtime_err(format!("output_off failed: {e}")))?;
            Ok(Dynamic::UNIT)
        },
    );

    // -- Power sensor -------------------------------------------------------

    engine.register_fn(
        "read_dbm",
        |sensor: &mut SensorHandle| -> Result<f64, Box<EvalAltResult>> {
            block_in_place(|| Handle::current().block_on(sensor.driver.read_dbm()))
                .map_err(|e| runtime_err(format!("read_dbm failed: {e}")))
        },
    );

    engine.register_fn(
        "set_frequency",
        |sensor: &mut SensorHandle, hz: f64| -> Result<Dynamic, Box<EvalAltResult>> {
            block_in_place(|| Handle::current().block_on(sensor.driver.set_frequency(hz)))
                .map_err(|e| runtime_err(format!("set_frequency failed: {e}")))?;
            Ok(Dynamic::UNIT)
        },
    );

    engine.register_fn(
        "zero",
        |sensor: &mut SensorHandle| -> Result<Dynamic, Box<EvalAltResult>> {
            block_in_place(|| Handle::current().block_on(sensor.driver.zero()))
                .map_err(|e| runtime_err(format!("zero failed: {e}")))?;
            Ok(Dynamic::UNIT)
        },
    );

    engine.register_fn(
        "set_averaging",
        |sensor: &mut SensorHandle, count: i64| -> Result<Dynamic, Box<EvalAltResult>> {
            let count = u32::try_from(count)
                .map_err(|_| runtime_err(format!("set_averaging: invalid count {count}")))?;
            block_in_place(|| Handle::current().block_on(sensor.driver.set_averaging(count)))
                .map_err(|e| runtime_err(format!("set_averaging failed: {e}")))?;
            Ok(Dynamic::UNIT)
        },
    );

    // -- Network analyzer ---------------------------------------------------

    engine.register_fn(
        "sweep",
        |vna: &mut VnaHandle, start: f64, stop: f64, points: i64| -> Result<Dynamic, Box<EvalAltResult>> {
            let points = usize::try_from(points)
                .map_err(|_| runtime_err(format!("sweep: invalid point count {points}")))?;
            let plan = SweepPlan::new(start, stop, points)
                .map_err(|e| runtime_err(format!("sweep failed: {e}")))?;
            block_in_place(|| Handle::current().block_on(vna.driver.configure_sweep(&plan)))
                .map_err(|e| runtime_err(format!("sweep failed: {e}")))?;
            Ok(Dynamic::UNIT)
        },
    );

    engine.register_fn(
        "set_power",
        |vna: &mut VnaHandle, dbm: f64| -> Result<Dynamic, Box<EvalAltResult>> {
            block_in_place(|| Handle::current().block_on(vna.driver.set_source_power(dbm)))
                .map_err(|e| runtime_err(format!("set_power failed: {e}")))?;
            Ok(Dynamic::UNIT)
        },
    );

    engine.register_fn(
        "output_on",
        |vna: &mut VnaHandle| -> Result<Dynamic, Box<EvalAltResult>> {
            block_in_place(|| Handle::current().block_on(vna.driver.set_output(true)))
                .map_err(|e| runtime_err(format!("output_on failed: {e}")))?;
            Ok(Dynamic::UNIT)
        },
    );

    engine.register_fn(
        "output_off",
        |vna: &mut VnaHandle| -> Result<Dynamic, Box<EvalAltResult>> {
            block_in_place(|| Handle::current().block_on(vna.driver.set_output(false)))
                .map_err(|e| runtime_err(format!("output_off failed: {e}")))?;
            Ok(Dynamic::UNIT)
        },
    );

    // let db = vna.acquire("S21") - sweep once, return log magnitude in dB
    engine.register_fn(
        "acquire",
        |vna: &mut VnaHandle, param: &str| -> Result<rhai::Array, Box<EvalAltResult>> {
            let trace = vna
                .acquire_param(param)
                .map_err(|e| runtime_err(format!("acquire failed: {e}")))?;
            Ok(trace
                .log_magnitude_db()
                .into_iter()
                .map(Dynamic::from)
                .collect())
        },
    );

    // let peak = vna.peak_db("S21") - highest point of a fresh acquisition
    engine.register_fn(
        "peak_db",
        |vna: &mut VnaHandle, param: &str| -> Result<f64, Box<EvalAltResult>> {
            let trace = vna
                .acquire_param(param)
                .map_err(|e| runtime_err(format!("peak_db failed: {e}")))?;
            Ok(trace.peak_db().1)
        },
    );

    // vna.save_s2p("dut.s2p") - full 2-port acquisition to a Touchstone file
    engine.register_fn(
        "save_s2p",
        |vna: &mut VnaHandle, path: &str| -> Result<Dynamic, Box<EvalAltResult>> {
            let sweep = vna
                .two_port()
                .map_err(|e| runtime_err(format!("save_s2p failed: {e}")))?;
            touchstone::write_s2p(path, &sweep)
                .map_err(|e| runtime_err(format!("save_s2p failed: {e}")))?;
            Ok(Dynamic::UNIT)
        },
    );

    // vna.save_csv("dut.csv") - last acquired trace as CSV
    #[cfg(feature = "storage_csv")]
    engine.register_fn(
        "save_csv",
        |vna: &mut VnaHandle, path: &str| -> Result<Dynamic, Box<EvalAltResult>> {
            let trace = vna
                .state()
                .last_trace
                .clone()
                .ok_or_else(|| runtime_err("save_csv failed: no trace acquired yet"))?;
            storage::write_complex_trace_csv(path, &trace)
                .map_err(|e| runtime_err(format!("save_csv failed: {e}")))?;
            Ok(Dynamic::UNIT)
        },
    );

    // -- Utilities ----------------------------------------------------------

    engine.register_fn("sleep", |seconds: f64| {
        std::thread::sleep(std::time::Duration::from_secs_f64(seconds.max(0.0)));
    });

    engine.register_fn("linspace", |start: f64, stop: f64, n: i64| -> rhai::Array {
        linspace(start, stop, usize::try_from(n).unwrap_or(0))
            .into_iter()
            .map(Dynamic::from)
            .collect()
    });

    // -- Mock factories -----------------------------------------------------

    engine.register_fn("mock_source", || -> SourceHandle {
        SourceHandle {
            driver: Arc::new(MockRfSource::default()),
        }
    });

    engine.register_fn("mock_sensor", || -> SensorHandle {
        SensorHandle {
            driver: Arc::new(MockPowerSensor::default()),
        }
    });

    engine.register_fn("mock_vna", || -> VnaHandle {
        VnaHandle::new(Arc::new(MockVna::new()))
    });
}

/// Builds a scope with one handle per registered instrument, named by its
/// config id. Spectrum analyzers have no script surface and are skipped.
pub fn bench_scope(bench: &Bench) -> Scope<'static> {
    let mut scope = Scope::new();
    let registry = bench.registry();
    for info in registry.list() {
        if !is_identifier(&info.id) {
            warn!(
                id = %info.id,
                "instrument id is not a valid script identifier, no handle injected"
            );
            continue;
        }
        for capability in &info.capabilities {
            match capability {
                Capability::RfSource => {
                    if let Ok(driver) = registry.rf_source(&info.id) {
                        scope.push(info.id.clone(), SourceHandle { driver });
                    }
                }
                Capability::PowerSensor => {
                    if let Ok(driver) = registry.power_sensor(&info.id) {
                        scope.push(info.id.clone(), SensorHandle { driver });
                    }
                }
                Capability::NetworkAnalyzer => {
                    if let Ok(driver) = registry.vna(&info.id) {
                        scope.push(info.id.clone(), VnaHandle::new(driver));
                    }
                }
                Capability::SpectrumSweep => {}
            }
        }
    }
    scope
}

fn is_identifier(id: &str) -> bool {
    let mut chars = id.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

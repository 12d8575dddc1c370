//! Rhai script host.
//!
//! Wraps a Rhai engine with the bench bindings registered and an operation
//! budget that stops runaway loops. Scripts are synchronous; the bindings
//! bridge into the async drivers, which requires running on a multi-thread
//! tokio runtime.
//!
//! # Example
//!
//! ```
//! use rf_bench::scripting::ScriptHost;
//!
//! # fn main() -> rf_bench::error::BenchResult<()> {
//! let host = ScriptHost::new();
//! let result = host.run("let points = 3; points * 2")?;
//! assert_eq!(result.cast::<i64>(), 6);
//! # Ok(())
//! # }
//! ```

use rhai::{Dynamic, Engine, EvalAltResult, Scope};

use crate::error::{BenchError, BenchResult};
use crate::scripting::bindings;

/// Operation budget for one script run. Sweep loops over a few thousand
/// points fit comfortably; an unbounded `while true` does not.
pub const MAX_OPERATIONS: u64 = 100_000;

/// A Rhai engine with the bench bindings registered.
pub struct ScriptHost {
    engine: Engine,
}

impl ScriptHost {
    /// A host with instrument bindings, utility functions, and the operation
    /// limit in place.
    pub fn new() -> Self {
        let mut engine = Engine::new();
        engine.on_progress(|count| {
            if count > MAX_OPERATIONS {
                Some(format!("operation limit exceeded ({MAX_OPERATIONS})").into())
            } else {
                None
            }
        });
        bindings::register_bench(&mut engine);
        Self { engine }
    }

    /// Run a script in a fresh scope. The last expression is the result.
    pub fn run(&self, script: &str) -> BenchResult<Dynamic> {
        let mut scope = Scope::new();
        self.run_with_scope(&mut scope, script)
    }

    /// Run a script against an existing scope, e.g. one holding the bench's
    /// instrument handles.
    pub fn run_with_scope(&self, scope: &mut Scope<'_>, script: &str) -> BenchResult<Dynamic> {
        self.engine
            .eval_with_scope(scope, script)
            .map_err(script_error)
    }

    /// Check that a script compiles, without executing it.
    pub fn validate(&self, script: &str) -> BenchResult<()> {
        self.engine
            .compile(script)
            .map_err(|e| BenchError::Script(e.to_string()))?;
        Ok(())
    }

    /// The underlying engine, for registering extra functions.
    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }
}

impl Default for ScriptHost {
    fn default() -> Self {
        Self::new()
    }
}

// EvalAltResult's Display carries the script position, but a termination
// shows only as "Script terminated"; pull the progress token out so the
// operator sees which limit fired.
fn script_error(e: Box<EvalAltResult>) -> BenchError {
    match *e {
        EvalAltResult::ErrorTerminated(token, ..) => BenchError::Script(token.to_string()),
        other => BenchError::Script(other.to_string()),
    }
}

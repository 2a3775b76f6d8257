//! Embedded scripting host and the actuation loop.
//!
//! User-customizable behavior (when a pulse pump may fire, how the switch
//! schedule stretches at night) lives in a rhai script, not in this crate.
//! The script surface is deliberately narrow: [`ScriptHost`] compiles the
//! script once and hands out the two capabilities the timers understand,
//! a [`Condition`] and a [`DurationTransform`]. Scripts read smoothed sensor
//! values through a registered `sensor("key")` function.
//!
//! Script failures never take the actuation loop down: a condition that
//! errors evaluates to `false`, a transform that errors leaves the durations
//! untouched, and a runaway script is stopped by an operation limit.
//!
//! # Example script
//!
//! ```text
//! fn needs_water() {
//!     sensor("humidity") < 40.0 && sensor("conductivity_weighted") < 2.0
//! }
//!
//! fn night_schedule(on_ms, off_ms) {
//!     [on_ms, off_ms * 2]
//! }
//! ```

use crate::error::{AppResult, HydrostatError};
use crate::metric::Metric;
use crate::pin::ActuatorPin;
use crate::store::{SensorStore, StateStore};
use crate::timer::{Condition, DurationTransform, PulseTimer, SwitchTimer};
use chrono::{DateTime, Utc};
use log::{info, warn};
use rhai::{Engine, Scope, AST};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Operation limit per script call; a script that exceeds it is aborted.
const MAX_SCRIPT_OPERATIONS: u64 = 10_000;

/// Compiled user script plus the engine it runs on.
#[derive(Debug)]
pub struct ScriptHost {
    engine: Arc<Engine>,
    ast: Arc<AST>,
}

impl ScriptHost {
    /// Compile the script at `path` against the given sensor store.
    pub fn load(path: &Path, store: Arc<SensorStore>) -> AppResult<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            HydrostatError::Script(format!("read script {}: {e}", path.display()))
        })?;
        Self::from_source(&source, store)
    }

    /// Compile script source directly. The test entry point.
    pub fn from_source(source: &str, store: Arc<SensorStore>) -> AppResult<Self> {
        let mut engine = Engine::new();

        engine.on_progress(|count| {
            if count > MAX_SCRIPT_OPERATIONS {
                Some(
                    format!("script aborted: exceeded {MAX_SCRIPT_OPERATIONS} operations").into(),
                )
            } else {
                None
            }
        });

        // The one window scripts get into the daemon: current smoothed
        // metric values by telemetry key. Unknown keys read as 0.0 so a
        // typo shows up in behavior, not as a crash.
        engine.register_fn("sensor", move |key: &str| -> f64 {
            match Metric::from_key(key) {
                Some(metric) => store.get(metric),
                None => {
                    warn!("script read unknown sensor key '{key}'");
                    0.0
                }
            }
        });

        let ast = engine
            .compile(source)
            .map_err(|e| HydrostatError::Script(format!("compile script: {e}")))?;

        Ok(Self {
            engine: Arc::new(engine),
            ast: Arc::new(ast),
        })
    }

    /// Whether the script defines a function with this name (any arity).
    pub fn has_function(&self, name: &str) -> bool {
        self.ast.iter_functions().any(|f| f.name == name)
    }

    /// A [`Condition`] calling the named zero-argument script function.
    ///
    /// Evaluation failures log a warning and gate to `false`; an erroring
    /// script must never fire a pump.
    pub fn condition(&self, fn_name: &str) -> Condition {
        let engine = Arc::clone(&self.engine);
        let ast = Arc::clone(&self.ast);
        let fn_name = fn_name.to_string();
        Arc::new(move || {
            match engine.call_fn::<bool>(&mut Scope::new(), &ast, &fn_name, ()) {
                Ok(result) => result,
                Err(e) => {
                    warn!("script condition '{fn_name}' failed: {e}");
                    false
                }
            }
        })
    }

    /// A [`DurationTransform`] calling the named script function with the
    /// (on, off) durations in milliseconds; the script returns a two-element
    /// array `[on_ms, off_ms]`.
    ///
    /// Failures log a warning and pass the durations through unchanged.
    pub fn duration_transform(&self, fn_name: &str) -> DurationTransform {
        let engine = Arc::clone(&self.engine);
        let ast = Arc::clone(&self.ast);
        let fn_name = fn_name.to_string();
        Arc::new(move |on, off| {
            let args = (on.as_millis() as i64, off.as_millis() as i64);
            match engine.call_fn::<rhai::Array>(&mut Scope::new(), &ast, &fn_name, args) {
                Ok(values) if values.len() == 2 => {
                    let parsed: Vec<Option<u64>> = values
                        .iter()
                        .map(|v| v.as_int().ok().and_then(|n| u64::try_from(n).ok()))
                        .collect();
                    match (parsed[0], parsed[1]) {
                        (Some(on_ms), Some(off_ms)) => (
                            Duration::from_millis(on_ms),
                            Duration::from_millis(off_ms),
                        ),
                        _ => {
                            warn!("script transform '{fn_name}' returned non-integer durations");
                            (on, off)
                        }
                    }
                }
                Ok(other) => {
                    warn!(
                        "script transform '{fn_name}' returned {} elements, expected 2",
                        other.len()
                    );
                    (on, off)
                }
                Err(e) => {
                    warn!("script transform '{fn_name}' failed: {e}");
                    (on, off)
                }
            }
        })
    }
}

/// The set of configured timers processed on every actuation tick.
pub struct TimerBank<P: ActuatorPin, S: StateStore> {
    store: Arc<S>,
    switches: Vec<(SwitchTimer<P>, Option<DurationTransform>)>,
    pulses: Vec<(PulseTimer<P>, Condition)>,
}

impl<P: ActuatorPin, S: StateStore> TimerBank<P, S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            switches: Vec::new(),
            pulses: Vec::new(),
        }
    }

    pub fn add_switch(&mut self, timer: SwitchTimer<P>, transform: Option<DurationTransform>) {
        self.switches.push((timer, transform));
    }

    pub fn add_pulse(&mut self, timer: PulseTimer<P>, condition: Condition) {
        self.pulses.push((timer, condition));
    }

    pub fn is_empty(&self) -> bool {
        self.switches.is_empty() && self.pulses.is_empty()
    }

    /// Process every timer for the instant `now`.
    ///
    /// Each timer is processed even when an earlier one fails; the first
    /// error is returned afterwards so a fatal pin policy still stops the
    /// loop without starving sibling timers of their tick.
    pub fn process_all(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        let mut first_error = None;

        for (timer, transform) in &mut self.switches {
            if let Err(e) = timer.process(now, transform.as_ref(), self.store.as_ref()) {
                warn!("switch timer {}: {e}", timer.name());
                first_error.get_or_insert(e);
            }
        }
        for (timer, condition) in &mut self.pulses {
            if let Err(e) = timer.process(now, condition, self.store.as_ref()) {
                warn!("pulse timer {}: {e}", timer.name());
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Drive the timer bank at a fixed interval until shutdown is requested.
///
/// Timer processing can block (a pulse sleeps for its duration), so each tick
/// runs on the blocking thread pool; a pulse that has started always
/// completes before shutdown is honored.
pub async fn run_actuation_loop<P, S>(
    mut bank: TimerBank<P, S>,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> AppResult<()>
where
    P: ActuatorPin + 'static,
    S: StateStore + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Utc::now();
                let (returned, result) = tokio::task::spawn_blocking(move || {
                    let result = bank.process_all(now);
                    (bank, result)
                })
                .await
                .map_err(|e| HydrostatError::Script(format!("actuation task panicked: {e}")))?;
                bank = returned;
                result?;
            }
            _ = shutdown.changed() => {
                info!("actuation loop: shutdown received -> closing");
                return Ok(());
            }
        }
    }
}

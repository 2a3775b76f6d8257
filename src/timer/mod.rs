//! Durable timer-driven actuator state machines.
//!
//! Two machines drive the pumps: [`switch::SwitchTimer`] alternates a pin
//! between on and off phases forever, [`pulse::PulseTimer`] fires a single
//! timed pulse whenever a condition holds and then waits. Both persist their
//! full state after every transition so a restart resumes mid-phase instead
//! of replaying initialization side effects.
//!
//! The machines are condition- and schedule-agnostic: user-customizable
//! behavior arrives through two narrow capabilities injected by the scripting
//! host: a [`Condition`] the pulse timer evaluates each cycle, and a
//! [`DurationTransform`] that may adjust the switch timer's phase durations
//! (for example, stretching the off phase at night).

pub mod pulse;
pub mod switch;

pub use pulse::{PulseTimer, PulseTimerState};
pub use switch::{SwitchPhase, SwitchTimer, SwitchTimerState};

use std::sync::Arc;
use std::time::Duration;

/// Boolean gate evaluated by the pulse timer each cycle. Typically reads
/// current sensor means and compares against thresholds.
pub type Condition = Arc<dyn Fn() -> bool + Send + Sync>;

/// Optional adjustment of the switch timer's (on, off) durations, applied on
/// every transition before the new span is computed.
pub type DurationTransform = Arc<dyn Fn(Duration, Duration) -> (Duration, Duration) + Send + Sync>;

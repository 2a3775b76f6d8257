//! Actuator pin abstraction.
//!
//! The timers drive pumps through the narrow [`ActuatorPin`] capability set
//! rather than a concrete GPIO driver; the physical character-device driver
//! is an external collaborator wired in at construction. [`MemoryPin`] is the
//! shipped implementation: it tracks levels in memory and records every
//! transition, which is what the tests assert against and what a pinless dry
//! run on a development host uses.
//!
//! Pin acquisition is lazy and may fail (the pin can be absent or already
//! claimed). Whether that is fatal is not the pin's decision: each timer
//! carries a [`PinPolicy`] choosing between propagating the error and
//! logging-and-continuing.

use crate::error::AppResult;
#[cfg(test)]
use crate::error::HydrostatError;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a timer does when driving its pin fails.
///
/// Either way the timer's persisted logical state is written first, so a
/// restart never re-runs a transition just because the pin was unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinPolicy {
    /// Propagate the pin error to the caller.
    #[default]
    Fatal,
    /// Log a warning and keep running.
    Tolerant,
}

/// Logical level of a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// Capability set the timers need from an actuator pin.
///
/// `pulse` is a blocking timed drive: active for the duration, then inactive.
/// A pulse, once started, always runs to completion; callers schedule it on
/// a blocking-friendly thread.
pub trait ActuatorPin: Send {
    fn set_high(&mut self) -> AppResult<()>;
    fn set_low(&mut self) -> AppResult<()>;
    fn pulse(&mut self, active: Level, duration: Duration) -> AppResult<()>;

    fn toggle(&mut self) -> AppResult<()> {
        match self.level() {
            Level::Low => self.set_high(),
            Level::High => self.set_low(),
        }
    }

    /// Current driven level.
    fn level(&self) -> Level;
}

/// In-memory pin recording every transition.
#[derive(Clone)]
pub struct MemoryPin {
    name: String,
    inner: Arc<Mutex<MemoryPinInner>>,
}

struct MemoryPinInner {
    level: Level,
    transitions: Vec<Level>,
}

impl MemoryPin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(Mutex::new(MemoryPinInner {
                level: Level::Low,
                transitions: Vec::new(),
            })),
        }
    }

    /// Every level this pin has been driven to, in order.
    pub fn transitions(&self) -> Vec<Level> {
        match self.inner.lock() {
            Ok(guard) => guard.transitions.clone(),
            Err(poisoned) => poisoned.into_inner().transitions.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn drive(&self, level: Level) {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.level = level;
        inner.transitions.push(level);
    }
}

impl ActuatorPin for MemoryPin {
    fn set_high(&mut self) -> AppResult<()> {
        self.drive(Level::High);
        Ok(())
    }

    fn set_low(&mut self) -> AppResult<()> {
        self.drive(Level::Low);
        Ok(())
    }

    fn pulse(&mut self, active: Level, duration: Duration) -> AppResult<()> {
        let (on, off) = match active {
            Level::High => (Level::High, Level::Low),
            Level::Low => (Level::Low, Level::High),
        };
        self.drive(on);
        std::thread::sleep(duration);
        self.drive(off);
        Ok(())
    }

    fn level(&self) -> Level {
        match self.inner.lock() {
            Ok(guard) => guard.level,
            Err(poisoned) => poisoned.into_inner().level,
        }
    }
}

/// Pin that fails every drive. Exercises the tolerant/fatal policy paths.
#[cfg(test)]
pub struct BrokenPin;

#[cfg(test)]
impl ActuatorPin for BrokenPin {
    fn set_high(&mut self) -> AppResult<()> {
        Err(HydrostatError::Pin("pin unavailable".into()))
    }

    fn set_low(&mut self) -> AppResult<()> {
        Err(HydrostatError::Pin("pin unavailable".into()))
    }

    fn pulse(&mut self, _active: Level, _duration: Duration) -> AppResult<()> {
        Err(HydrostatError::Pin("pin unavailable".into()))
    }

    fn level(&self) -> Level {
        Level::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_pin_records_transitions() {
        let mut pin = MemoryPin::new("p");
        pin.set_high().unwrap();
        pin.set_low().unwrap();
        pin.set_high().unwrap();
        assert_eq!(pin.level(), Level::High);
        assert_eq!(pin.transitions(), vec![Level::High, Level::Low, Level::High]);
    }

    #[test]
    fn test_toggle_flips_level() {
        let mut pin = MemoryPin::new("p");
        assert_eq!(pin.level(), Level::Low);
        pin.toggle().unwrap();
        assert_eq!(pin.level(), Level::High);
        pin.toggle().unwrap();
        assert_eq!(pin.level(), Level::Low);
    }

    #[test]
    fn test_pulse_ends_inactive() {
        let mut pin = MemoryPin::new("p");
        pin.pulse(Level::High, Duration::from_millis(1)).unwrap();
        assert_eq!(pin.transitions(), vec![Level::High, Level::Low]);
        assert_eq!(pin.level(), Level::Low);
    }

    #[test]
    fn test_inverted_pulse_ends_high() {
        let mut pin = MemoryPin::new("p");
        pin.pulse(Level::Low, Duration::from_millis(1)).unwrap();
        assert_eq!(pin.transitions(), vec![Level::Low, Level::High]);
    }
}

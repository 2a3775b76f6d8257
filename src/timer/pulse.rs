//! Condition-gated pulse-then-wait actuator state machine.
//!
//! Unlike the switch timer there is no persisted phase flag: the span plus
//! the injected condition fully determine behavior. Each cycle either fires a
//! blocking timed pulse (condition true) or holds the pin inactive (condition
//! false), then re-arms the wait span and persists. A pulse that has started
//! always runs to completion.
//!
//! With no span persisted yet, the first `process` call either pulses
//! immediately (`pulse_on_initialize`) or just arms the wait span.

use crate::error::AppResult;
use crate::pin::{ActuatorPin, Level, PinPolicy};
use crate::store::StateStore;
use crate::timer::Condition;
use crate::timespan::Span;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The persisted face of a [`PulseTimer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseTimerState {
    pub name: String,
    #[serde(with = "humantime_serde")]
    pub pulse_duration: Duration,
    #[serde(with = "humantime_serde")]
    pub wait_duration: Duration,
    pub pulse_on_initialize: bool,
    pub inverted: bool,
    #[serde(default)]
    pub pin_policy: PinPolicy,
    pub span: Option<Span>,
}

impl PulseTimerState {
    pub fn new(name: impl Into<String>, pulse_duration: Duration, wait_duration: Duration) -> Self {
        Self {
            name: name.into(),
            pulse_duration,
            wait_duration,
            pulse_on_initialize: false,
            inverted: false,
            pin_policy: PinPolicy::default(),
            span: None,
        }
    }

    pub fn pulse_on_initialize(mut self, pulse: bool) -> Self {
        self.pulse_on_initialize = pulse;
        self
    }

    pub fn inverted(mut self, inverted: bool) -> Self {
        self.inverted = inverted;
        self
    }

    pub fn pin_policy(mut self, policy: PinPolicy) -> Self {
        self.pin_policy = policy;
        self
    }
}

/// Single-pulse-then-wait actuator state machine with persisted span.
pub struct PulseTimer<P: ActuatorPin> {
    state: PulseTimerState,
    pin: P,
}

impl<P: ActuatorPin> PulseTimer<P> {
    pub fn new(state: PulseTimerState, pin: P) -> Self {
        Self { state, pin }
    }

    /// Build a timer, resuming persisted state under the same name if any.
    pub fn restore<S: StateStore>(state: PulseTimerState, pin: P, store: &S) -> AppResult<Self> {
        match store.get::<PulseTimerState>(&state.name) {
            Ok(saved) => {
                debug!("pulse timer {}: resuming persisted state", saved.name);
                Ok(Self { state: saved, pin })
            }
            Err(e) if e.is_not_found() => {
                store.upsert(&state.name, &state)?;
                Ok(Self { state, pin })
            }
            Err(e) => Err(e),
        }
    }

    pub fn state(&self) -> &PulseTimerState {
        &self.state
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Advance the state machine for the instant `now`.
    ///
    /// No span yet: pulse immediately when `pulse_on_initialize` is set,
    /// otherwise just arm the wait span. An unexpired span: no-op. An expired
    /// span: evaluate the condition and pulse or hold inactive accordingly.
    /// Every path that acts re-arms the span to `now + wait_duration` and
    /// persists before the pin outcome is judged against the policy.
    pub fn process<S: StateStore>(
        &mut self,
        now: DateTime<Utc>,
        condition: &Condition,
        store: &S,
    ) -> AppResult<()> {
        debug!("process pulse timer {}", self.state.name);

        match self.state.span {
            None => {
                info!("initialize pulse timer {}", self.state.name);
                if self.state.pulse_on_initialize {
                    self.cycle(now, condition, store)
                } else {
                    self.state.span = Some(Span::new(now, self.state.wait_duration));
                    store.upsert(&self.state.name, &self.state)?;
                    Ok(())
                }
            }
            Some(span) if span.contains_time(now) => Ok(()),
            Some(_) => self.cycle(now, condition, store),
        }
    }

    /// One evaluate-act-rearm cycle.
    fn cycle<S: StateStore>(
        &mut self,
        now: DateTime<Utc>,
        condition: &Condition,
        store: &S,
    ) -> AppResult<()> {
        let drive_result = if condition() {
            info!(
                "pulse timer {}: pulse for {:?}",
                self.state.name, self.state.pulse_duration
            );
            let active = if self.state.inverted { Level::Low } else { Level::High };
            self.pin.pulse(active, self.state.pulse_duration)
        } else {
            info!(
                "pulse timer {}: condition not met, try again in {:?}",
                self.state.name, self.state.wait_duration
            );
            if self.state.inverted {
                self.pin.set_high()
            } else {
                self.pin.set_low()
            }
        };

        self.state.span = Some(Span::new(now, self.state.wait_duration));
        store.upsert(&self.state.name, &self.state)?;

        match drive_result {
            Ok(()) => Ok(()),
            Err(e) if self.state.pin_policy == PinPolicy::Tolerant => {
                warn!("pulse timer {}: pin drive failed: {e}", self.state.name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pin::{BrokenPin, MemoryPin};
    use crate::store::MemoryStateStore;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn timer_state() -> PulseTimerState {
        PulseTimerState::new("feed", Duration::from_millis(1), Duration::from_secs(10))
    }

    fn always() -> Condition {
        Arc::new(|| true)
    }

    fn never() -> Condition {
        Arc::new(|| false)
    }

    #[test]
    fn test_pulse_on_initialize_fires_once() {
        let store = MemoryStateStore::new();
        let pin = MemoryPin::new("feed");
        let mut timer = PulseTimer::new(timer_state().pulse_on_initialize(true), pin.clone());

        timer.process(at(0), &always(), &store).unwrap();
        assert_eq!(pin.transitions(), vec![Level::High, Level::Low]);

        // No-op until the wait span expires.
        timer.process(at(3), &always(), &store).unwrap();
        timer.process(at(9), &always(), &store).unwrap();
        assert_eq!(pin.transitions().len(), 2);

        // Re-evaluates after expiry.
        timer.process(at(11), &always(), &store).unwrap();
        assert_eq!(pin.transitions().len(), 4);
    }

    #[test]
    fn test_initialize_without_pulse_only_arms_span() {
        let store = MemoryStateStore::new();
        let pin = MemoryPin::new("feed");
        let mut timer = PulseTimer::new(timer_state(), pin.clone());

        timer.process(at(0), &always(), &store).unwrap();
        assert!(pin.transitions().is_empty());

        let saved: PulseTimerState = store.get("feed").unwrap();
        assert_eq!(saved.span.unwrap().duration(), Duration::from_secs(10));
    }

    #[test]
    fn test_condition_not_met_holds_inactive_and_rearms() {
        let store = MemoryStateStore::new();
        let pin = MemoryPin::new("feed");
        let mut timer = PulseTimer::new(timer_state(), pin.clone());

        timer.process(at(0), &never(), &store).unwrap(); // arm
        timer.process(at(11), &never(), &store).unwrap(); // expired, condition false

        assert_eq!(pin.transitions(), vec![Level::Low]);
        let saved: PulseTimerState = store.get("feed").unwrap();
        assert!(saved.span.unwrap().contains_time(at(11)));
    }

    #[test]
    fn test_condition_not_evaluated_inside_span() {
        let store = MemoryStateStore::new();
        let pin = MemoryPin::new("feed");
        let mut timer = PulseTimer::new(timer_state(), pin);

        let calls = Arc::new(AtomicUsize::new(0));
        let counting: Condition = {
            let calls = Arc::clone(&calls);
            Arc::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                false
            })
        };

        timer.process(at(0), &counting, &store).unwrap(); // arm, no evaluation
        timer.process(at(5), &counting, &store).unwrap(); // inside span
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        timer.process(at(11), &counting, &store).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_inverted_pulse_polarity() {
        let store = MemoryStateStore::new();
        let pin = MemoryPin::new("feed");
        let state = timer_state().pulse_on_initialize(true).inverted(true);
        let mut timer = PulseTimer::new(state, pin.clone());

        timer.process(at(0), &always(), &store).unwrap();
        assert_eq!(pin.transitions(), vec![Level::Low, Level::High]);
    }

    #[test]
    fn test_tolerant_policy_persists_and_continues() {
        let store = MemoryStateStore::new();
        let state = timer_state()
            .pulse_on_initialize(true)
            .pin_policy(PinPolicy::Tolerant);
        let mut timer = PulseTimer::new(state, BrokenPin);

        timer.process(at(0), &always(), &store).unwrap();

        let saved: PulseTimerState = store.get("feed").unwrap();
        assert!(saved.span.is_some());
    }

    #[test]
    fn test_fatal_policy_persists_then_propagates() {
        let store = MemoryStateStore::new();
        let state = timer_state().pulse_on_initialize(true);
        let mut timer = PulseTimer::new(state, BrokenPin);

        let err = timer.process(at(0), &always(), &store).unwrap_err();
        assert!(matches!(err, crate::error::HydrostatError::Pin(_)));
        assert!(store.get::<PulseTimerState>("feed").unwrap().span.is_some());
    }

    #[test]
    fn test_restore_resumes_persisted_span() {
        let store = MemoryStateStore::new();
        {
            let mut timer = PulseTimer::new(timer_state(), MemoryPin::new("feed"));
            timer.process(at(0), &always(), &store).unwrap();
        }

        let pin = MemoryPin::new("feed");
        let mut timer = PulseTimer::restore(timer_state(), pin.clone(), &store).unwrap();
        assert!(timer.state().span.is_some());

        // Persisted span still active: restart neither pulses nor drives.
        timer.process(at(5), &always(), &store).unwrap();
        assert!(pin.transitions().is_empty());
    }

    #[test]
    fn test_state_round_trips_through_store() {
        let store = MemoryStateStore::new();
        let state = timer_state()
            .pulse_on_initialize(true)
            .inverted(true)
            .pin_policy(PinPolicy::Tolerant);
        store.upsert(&state.name, &state).unwrap();
        let back: PulseTimerState = store.get(&state.name).unwrap();
        assert_eq!(back, state);
    }
}

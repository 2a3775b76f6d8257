//! Cyclic on/off actuator state machine.
//!
//! Phases run `Initialized → Off → On → Off → On → …`; `Initialized` is left
//! on the first [`SwitchTimer::process`] call and never revisited. A phase
//! change is only valid once "now" has left the current span; inside the
//! span, `process` is a no-op.
//!
//! Side effects on every transition are strictly ordered: compute the new
//! span, drive the pin to the polarity implied by (phase, inverted flag),
//! persist. State is persisted even when the pin drive fails, so a restart
//! resumes the intended logical schedule instead of retrying an unreachable
//! pin forever; whether the failure then aborts the caller is the timer's
//! [`PinPolicy`].

use crate::error::AppResult;
use crate::pin::{ActuatorPin, PinPolicy};
use crate::store::StateStore;
use crate::timer::DurationTransform;
use crate::timespan::Span;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Phase of the cyclic schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchPhase {
    Initialized,
    Off,
    On,
}

/// The persisted face of a [`SwitchTimer`]: everything needed to resume the
/// schedule after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchTimerState {
    pub name: String,
    #[serde(with = "humantime_serde")]
    pub on_duration: Duration,
    #[serde(with = "humantime_serde")]
    pub off_duration: Duration,
    pub inverted: bool,
    #[serde(default)]
    pub pin_policy: PinPolicy,
    pub phase: SwitchPhase,
    pub span: Option<Span>,
}

impl SwitchTimerState {
    pub fn new(name: impl Into<String>, on_duration: Duration, off_duration: Duration) -> Self {
        Self {
            name: name.into(),
            on_duration,
            off_duration,
            inverted: false,
            pin_policy: PinPolicy::default(),
            phase: SwitchPhase::Initialized,
            span: None,
        }
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

/// Two-phase cyclic actuator state machine with persisted span and phase.
pub struct SwitchTimer<P: ActuatorPin> {
    state: SwitchTimerState,
    pin: P,
}

impl<P: ActuatorPin> SwitchTimer<P> {
    /// Build a timer from a fresh state and its owned pin.
    pub fn new(state: SwitchTimerState, pin: P) -> Self {
        Self { state, pin }
    }

    /// Build a timer, resuming persisted state under the same name if any.
    ///
    /// A previously persisted schedule wins over the passed-in `state` so a
    /// restart continues mid-phase; when nothing is stored yet the fresh
    /// state is persisted as-is.
    pub fn restore<S: StateStore>(state: SwitchTimerState, pin: P, store: &S) -> AppResult<Self> {
        match store.get::<SwitchTimerState>(&state.name) {
            Ok(saved) => {
                debug!("switch timer {}: resuming persisted state", saved.name);
                Ok(Self { state: saved, pin })
            }
            Err(e) if e.is_not_found() => {
                store.upsert(&state.name, &state)?;
                Ok(Self { state, pin })
            }
            Err(e) => Err(e),
        }
    }

    pub fn state(&self) -> &SwitchTimerState {
        &self.state
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Advance the state machine for the instant `now`.
    ///
    /// Inside the current span this is a no-op returning success. On expiry
    /// (or on the very first call) the machine flips phase, re-arms the span
    /// with the on/off duration (run through `transform` when one is
    /// supplied), drives the pin, and persists.
    pub fn process<S: StateStore>(
        &mut self,
        now: DateTime<Utc>,
        transform: Option<&DurationTransform>,
        store: &S,
    ) -> AppResult<()> {
        debug!("process switch timer {}", self.state.name);

        let (on_duration, off_duration) = match transform {
            Some(t) => t(self.state.on_duration, self.state.off_duration),
            None => (self.state.on_duration, self.state.off_duration),
        };

        let (next_phase, span_duration) = match self.state.phase {
            SwitchPhase::Initialized => (SwitchPhase::Off, off_duration),
            SwitchPhase::Off => {
                if self.span_active(now) {
                    return Ok(());
                }
                (SwitchPhase::On, on_duration)
            }
            SwitchPhase::On => {
                if self.span_active(now) {
                    return Ok(());
                }
                (SwitchPhase::Off, off_duration)
            }
        };

        self.state.phase = next_phase;
        self.state.span = Some(Span::new(now, span_duration));

        let active = next_phase == SwitchPhase::On;
        let drive_result = self.drive(active);

        info!(
            "switch timer {} turned {}",
            self.state.name,
            if active { "on" } else { "off" }
        );

        // Persist the intended logical state before judging the pin outcome.
        store.upsert(&self.state.name, &self.state)?;

        match drive_result {
            Ok(()) => Ok(()),
            Err(e) if self.state.pin_policy == PinPolicy::Tolerant => {
                warn!("switch timer {}: pin drive failed: {e}", self.state.name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn span_active(&self, now: DateTime<Utc>) -> bool {
        self.state
            .span
            .is_some_and(|span| span.contains_time(now))
    }

    /// Drive the pin to the physical level implied by the logical `active`
    /// state and the inverted flag.
    fn drive(&mut self, active: bool) -> AppResult<()> {
        if active != self.state.inverted {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        }
    }
}

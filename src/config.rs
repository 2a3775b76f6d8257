//! Configuration loading and validation.
//!
//! Configuration merges two sources, highest precedence first:
//! 1. Environment variables (`HYDROSTAT_` prefix, `__` nesting separator,
//!    e.g. `HYDROSTAT_SENSOR__PORT=/dev/ttyUSB1`)
//! 2. A TOML file (`hydrostat.toml` by default)
//!
//! Every field has a default, so the daemon starts with no config file at
//! all. Durations are written human-style (`"5s"`, `"250ms"`). Timers are
//! declared in config and wired to script functions by name:
//!
//! ```text
//! [[timers.switch]]
//! name = "grow_light"
//! on = "8h"
//! off = "16h"
//!
//! [[timers.pulse]]
//! name = "feed_pump"
//! pulse = "3s"
//! wait = "10m"
//! condition_fn = "needs_water"
//! ```

use crate::error::{AppResult, HydrostatError};
use crate::pin::PinPolicy;
use crate::store::sensor::DEFAULT_WINDOW_CAPACITY;
use crate::timer::{PulseTimerState, SwitchTimerState};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file path, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "hydrostat.toml";

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub script: ScriptConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub timers: TimersConfig,
}

/// Serial sensor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Serial port path, or `"auto"` for the first enumerated port.
    #[serde(default = "default_port")]
    pub port: String,
    /// Time between full register sweeps.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Port-level read timeout.
    #[serde(default = "default_read_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Samples kept per metric for smoothing.
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,
}

/// Durable state directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

/// User script settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Path to the rhai script. Timers referencing script functions require it.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Time between actuation ticks.
    #[serde(default = "default_run_interval", with = "humantime_serde")]
    pub run_interval: Duration,
}

/// MQTT telemetry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker endpoint as `tcp://host:port`.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
}

/// Declared actuator timers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimersConfig {
    #[serde(default)]
    pub switch: Vec<SwitchTimerConfig>,
    #[serde(default)]
    pub pulse: Vec<PulseTimerConfig>,
}

/// One cyclic on/off timer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchTimerConfig {
    pub name: String,
    #[serde(with = "humantime_serde")]
    pub on: Duration,
    #[serde(with = "humantime_serde")]
    pub off: Duration,
    #[serde(default)]
    pub inverted: bool,
    #[serde(default)]
    pub pin_policy: PinPolicy,
    /// Optional script function adjusting the (on, off) durations each tick.
    #[serde(default)]
    pub transform_fn: Option<String>,
}

/// One condition-gated pulse timer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulseTimerConfig {
    pub name: String,
    #[serde(with = "humantime_serde")]
    pub pulse: Duration,
    #[serde(with = "humantime_serde")]
    pub wait: Duration,
    #[serde(default)]
    pub pulse_on_initialize: bool,
    #[serde(default)]
    pub inverted: bool,
    #[serde(default)]
    pub pin_policy: PinPolicy,
    /// Script function deciding whether the pulse fires.
    pub condition_fn: String,
}

impl SwitchTimerConfig {
    pub fn to_state(&self) -> SwitchTimerState {
        SwitchTimerState::new(&self.name, self.on, self.off)
            .inverted(self.inverted)
            .pin_policy(self.pin_policy)
    }
}

impl PulseTimerConfig {
    pub fn to_state(&self) -> PulseTimerState {
        PulseTimerState::new(&self.name, self.pulse, self.wait)
            .pulse_on_initialize(self.pulse_on_initialize)
            .inverted(self.inverted)
            .pin_policy(self.pin_policy)
    }
}

impl MqttConfig {
    /// Split the endpoint into (host, port). Only `tcp://` is supported.
    pub fn broker_address(&self) -> AppResult<(String, u16)> {
        let rest = self.endpoint.strip_prefix("tcp://").ok_or_else(|| {
            HydrostatError::Config(format!(
                "mqtt endpoint '{}' must start with tcp://",
                self.endpoint
            ))
        })?;
        let (host, port) = rest.split_once(':').ok_or_else(|| {
            HydrostatError::Config(format!(
                "mqtt endpoint '{}' is missing a port",
                self.endpoint
            ))
        })?;
        let port: u16 = port.parse().map_err(|_| {
            HydrostatError::Config(format!("mqtt endpoint '{}' has an invalid port", self.endpoint))
        })?;
        if host.is_empty() {
            return Err(HydrostatError::Config(format!(
                "mqtt endpoint '{}' has an empty host",
                self.endpoint
            )));
        }
        Ok((host.to_string(), port))
    }
}

impl Config {
    /// Load from [`DEFAULT_CONFIG_PATH`] plus environment overrides.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific TOML file plus environment overrides, then
    /// validate. A missing file is fine; defaults apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("HYDROSTAT_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks figment cannot express.
    pub fn validate(&self) -> AppResult<()> {
        if self.sensor.poll_interval.is_zero() {
            return Err(HydrostatError::Config(
                "sensor.poll_interval must be positive".into(),
            ));
        }
        if self.sensor.window_capacity == 0 {
            return Err(HydrostatError::Config(
                "sensor.window_capacity must be positive".into(),
            ));
        }
        if self.script.run_interval.is_zero() {
            return Err(HydrostatError::Config(
                "script.run_interval must be positive".into(),
            ));
        }

        self.mqtt.broker_address()?;

        let mut names = HashSet::new();
        for name in self
            .timers
            .switch
            .iter()
            .map(|t| &t.name)
            .chain(self.timers.pulse.iter().map(|t| &t.name))
        {
            if name.is_empty() {
                return Err(HydrostatError::Config("timer name cannot be empty".into()));
            }
            if !names.insert(name) {
                return Err(HydrostatError::Config(format!(
                    "duplicate timer name '{name}'"
                )));
            }
        }

        for pulse in &self.timers.pulse {
            if pulse.condition_fn.is_empty() {
                return Err(HydrostatError::Config(format!(
                    "pulse timer '{}': condition_fn cannot be empty",
                    pulse.name
                )));
            }
        }

        let needs_script = !self.timers.pulse.is_empty()
            || self.timers.switch.iter().any(|t| t.transform_fn.is_some());
        if needs_script && self.script.path.is_none() {
            return Err(HydrostatError::Config(
                "timers reference script functions but script.path is not set".into(),
            ));
        }

        Ok(())
    }
}

fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_window_capacity() -> usize {
    DEFAULT_WINDOW_CAPACITY
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("hydrostat_state")
}

fn default_run_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_endpoint() -> String {
    "tcp://localhost:1883".to_string()
}

fn default_client_id() -> String {
    "sensor".to_string()
}

fn default_topic_prefix() -> String {
    "tele".to_string()
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            poll_interval: default_poll_interval(),
            read_timeout: default_read_timeout(),
            window_capacity: default_window_capacity(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            path: None,
            run_interval: default_run_interval(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            client_id: default_client_id(),
            username: None,
            password: None,
            topic_prefix: default_topic_prefix(),
        }
    }
}

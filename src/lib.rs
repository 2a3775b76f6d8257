//! Soil sensor polling and irrigation actuation daemon.
//!
//! hydrostat polls a soil probe over a fixed-frame serial protocol, smooths
//! the readings in per-metric rolling windows, derives compensated
//! conductivity measurements, publishes snapshots over MQTT, and drives
//! irrigation actuators through two durable timer state machines whose
//! behavior is customized by an embedded rhai script.
//!
//! The library is organized as three loosely-coupled loops around a shared
//! [`store::SensorStore`]:
//!
//! - [`reader`] polls the sensor and feeds decoded snapshots into a bounded
//!   channel
//! - [`publish`] drains that channel to the MQTT broker
//! - [`script`] ticks the actuator timers, consulting the user script

pub mod config;
pub mod decode;
pub mod error;
pub mod metric;
pub mod pin;
pub mod publish;
pub mod reader;
pub mod script;
pub mod store;
pub mod timer;
pub mod timespan;
pub mod transport;

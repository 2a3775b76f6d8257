//! Shared data stores.
//!
//! [`sensor`] holds the in-memory rolling window of recent readings that the
//! decode path writes and the script/publish paths read. [`state`] is the
//! durable key-value store the actuator timers persist their state into so
//! transition timing survives restarts.

pub mod sensor;
pub mod state;

pub use sensor::SensorStore;
pub use state::{JsonStateStore, MemoryStateStore, StateStore};

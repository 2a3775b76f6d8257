//! Sensor metric identifiers and their request frames.
//!
//! The sensor speaks a Modbus-RTU-style protocol: each metric is read with a
//! fixed 8-byte request frame (address, function 0x03, register, count, CRC)
//! and answered with a fixed 8-byte response frame carrying a big-endian
//! 16-bit value. The request frames below are verbatim from the device
//! documentation, CRC included; they are constants of the wire protocol, not
//! computed at runtime.
//!
//! `Metric` is a closed set with stable ordinals; new metrics are additive
//! only. The first five are polled from the device, the remaining two are
//! derived by the decode pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of both request and response frames on the wire.
pub const FRAME_LEN: usize = 8;

/// One enumerated sensor quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Metric {
    Humidity = 0,
    Temperature = 1,
    Conductivity = 2,
    Salinity = 3,
    Tds = 4,
    ConductivityWeighted = 5,
    ConductivityRaw = 6,
}

/// Metrics polled from the device, in register order.
pub const POLLED_METRICS: [Metric; 5] = [
    Metric::Humidity,
    Metric::Temperature,
    Metric::Conductivity,
    Metric::Salinity,
    Metric::Tds,
];

/// All metrics, polled and derived, in ordinal order.
pub const ALL_METRICS: [Metric; 7] = [
    Metric::Humidity,
    Metric::Temperature,
    Metric::Conductivity,
    Metric::Salinity,
    Metric::Tds,
    Metric::ConductivityWeighted,
    Metric::ConductivityRaw,
];

impl Metric {
    /// The fixed request frame that reads this metric from the device, or
    /// `None` for derived metrics that have no register of their own.
    pub fn request_frame(self) -> Option<&'static [u8; FRAME_LEN]> {
        match self {
            Metric::Humidity => Some(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0a]),
            Metric::Temperature => Some(&[0x01, 0x03, 0x00, 0x01, 0x00, 0x01, 0xd5, 0xca]),
            Metric::Conductivity => Some(&[0x01, 0x03, 0x00, 0x02, 0x00, 0x01, 0x25, 0xca]),
            Metric::Salinity => Some(&[0x01, 0x03, 0x00, 0x03, 0x00, 0x01, 0x74, 0x0a]),
            Metric::Tds => Some(&[0x01, 0x03, 0x00, 0x04, 0x00, 0x01, 0xc5, 0xcb]),
            Metric::ConductivityWeighted | Metric::ConductivityRaw => None,
        }
    }

    /// Look a metric up by its telemetry key. Scripts address metrics by
    /// these names.
    pub fn from_key(key: &str) -> Option<Self> {
        ALL_METRICS.into_iter().find(|m| m.key() == key)
    }

    /// Stable telemetry key for this metric.
    pub fn key(self) -> &'static str {
        match self {
            Metric::Humidity => "humidity",
            Metric::Temperature => "temperature",
            Metric::Conductivity => "conductivity",
            Metric::Salinity => "salinity",
            Metric::Tds => "tds",
            Metric::ConductivityWeighted => "conductivity_weighted",
            Metric::ConductivityRaw => "conductivity_raw",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

//! Fixed-frame decode and derived-measurement pipeline.
//!
//! A response frame is 8 bytes: address, function, byte count, big-endian
//! 16-bit value, 2-byte CRC. CRC verification is the transport's concern and
//! is not repeated here, but the frame length is checked: an undersized
//! buffer fails with a decode error instead of reading out of bounds, and a
//! failed decode never touches the sensor store.
//!
//! Per-metric decode rules:
//!
//! - Humidity: raw / 10, clamped to \[0, 100\] %RH
//! - Temperature: raw / 10, clamped to \[0, 35\] °C
//! - Conductivity: the raw value is stored as `conductivity_raw`, then scaled
//!   by the current humidity mean, `delta = 100 / humidity` (1.0 when the
//!   humidity window is empty), as
//!   `((raw / 1000) * delta + 1) * CONDUCTIVITY_SCALE`, clamped to \[0, 5\]
//! - Salinity, TDS: raw value as-is
//!
//! After any decode, if both the conductivity and temperature means are
//! positive, the temperature-normalized `conductivity_weighted` is recomputed
//! and stored. Several historical variants of that compensation exist and the
//! physically correct direction is debatable, so it is a replaceable function
//! on the decoder; [`compensate_linear_25c`] is the default.

use crate::error::{AppResult, HydrostatError};
use crate::metric::{Metric, FRAME_LEN};
use crate::store::SensorStore;

/// Calibration constant applied to the scaled conductivity reading.
pub const CONDUCTIVITY_SCALE: f64 = 0.8;

/// Replaceable temperature-compensation function: (conductivity, °C) → compensated.
pub type CompensationFn = fn(f64, f64) -> f64;

/// Linear normalization to 25 °C at 2 %/°C. The default.
pub fn compensate_linear_25c(cond: f64, temperature: f64) -> f64 {
    cond * (1.0 + 0.02 * (25.0 - temperature))
}

/// Reciprocal cell-constant compensation (K = 0.0165 / °C), an alternate
/// calibration kept for comparison against field measurements.
pub fn compensate_reciprocal(ec: f64, temperature: f64) -> f64 {
    if temperature == 0.0 {
        return ec;
    }
    let k = 0.0165 / temperature;
    1.0 / (1.0 / (ec * 1e-4) + k) * 1e4
}

/// Decodes response frames and writes results into the sensor store.
#[derive(Clone, Copy)]
pub struct Decoder {
    compensation: CompensationFn,
}

impl Decoder {
    pub fn new() -> Self {
        Self { compensation: compensate_linear_25c }
    }

    /// A decoder using a different temperature-compensation calibration.
    pub fn with_compensation(compensation: CompensationFn) -> Self {
        Self { compensation }
    }

    /// Decode `frame` as a reading of `metric`, write the decoded and any
    /// derived values into `store`, and return the decoded value formatted to
    /// two decimal places for logging and telemetry.
    ///
    /// # Errors
    ///
    /// Fails without touching the store when the frame is not exactly
    /// [`FRAME_LEN`] bytes or when `metric` is a derived metric that has no
    /// response frame of its own.
    pub fn decode(&self, metric: Metric, frame: &[u8], store: &SensorStore) -> AppResult<String> {
        if frame.len() != FRAME_LEN {
            return Err(HydrostatError::Decode(format!(
                "{metric}: expected {FRAME_LEN}-byte frame, got {} bytes",
                frame.len()
            )));
        }

        let raw = f64::from(u16::from_be_bytes([frame[3], frame[4]]));

        let decoded = match metric {
            Metric::Humidity => {
                let humidity = (raw / 10.0).clamp(0.0, 100.0);
                store.set(Metric::Humidity, humidity);
                humidity
            }
            Metric::Temperature => {
                let temperature = (raw / 10.0).clamp(0.0, 35.0);
                store.set(Metric::Temperature, temperature);
                temperature
            }
            Metric::Conductivity => {
                store.set(Metric::ConductivityRaw, raw);

                // Couples two metrics: the scale depends on the current
                // smoothed humidity, defaulting to 1.0 before the first
                // humidity reading arrives.
                let humidity = store.get(Metric::Humidity);
                let delta = if humidity == 0.0 { 1.0 } else { 100.0 / humidity };

                let cond = ((raw / 1000.0) * delta + 1.0) * CONDUCTIVITY_SCALE;
                let cond = cond.clamp(0.0, 5.0);
                store.set(Metric::Conductivity, cond);
                cond
            }
            Metric::Salinity => {
                store.set(Metric::Salinity, raw);
                raw
            }
            Metric::Tds => {
                store.set(Metric::Tds, raw);
                raw
            }
            Metric::ConductivityWeighted | Metric::ConductivityRaw => {
                return Err(HydrostatError::Decode(format!(
                    "{metric} is derived and has no response frame"
                )));
            }
        };

        self.update_weighted(store);

        Ok(format!("{decoded:.2}"))
    }

    /// Recompute the temperature-normalized conductivity when both inputs
    /// have meaningful current means.
    fn update_weighted(&self, store: &SensorStore) {
        let cond = store.get(Metric::Conductivity);
        let temperature = store.get(Metric::Temperature);
        if cond > 0.0 && temperature > 0.0 {
            store.set(
                Metric::ConductivityWeighted,
                (self.compensation)(cond, temperature),
            );
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A well-formed response frame carrying `raw` as its value.
    fn frame(raw: u16) -> [u8; FRAME_LEN] {
        let [hi, lo] = raw.to_be_bytes();
        [0x01, 0x03, 0x02, hi, lo, 0x00, 0x00, 0x00]
    }

    #[test]
    fn test_humidity_scaled_and_clamped() {
        let store = SensorStore::new(10);
        let decoder = Decoder::new();

        let out = decoder.decode(Metric::Humidity, &frame(300), &store).unwrap();
        assert_eq!(out, "30.00");
        assert_eq!(store.get(Metric::Humidity), 30.0);

        let store = SensorStore::new(10);
        let out = decoder.decode(Metric::Humidity, &frame(1050), &store).unwrap();
        assert_eq!(out, "100.00");
        assert_eq!(store.get(Metric::Humidity), 100.0);
    }

    #[test]
    fn test_temperature_clamped_to_35() {
        let store = SensorStore::new(10);
        let decoder = Decoder::new();

        decoder.decode(Metric::Temperature, &frame(400), &store).unwrap();
        assert_eq!(store.get(Metric::Temperature), 35.0);
    }

    #[test]
    fn test_conductivity_uses_humidity_delta() {
        let store = SensorStore::new(10);
        let decoder = Decoder::new();

        decoder.decode(Metric::Humidity, &frame(500), &store).unwrap();
        assert_eq!(store.get(Metric::Humidity), 50.0);

        decoder.decode(Metric::Conductivity, &frame(1000), &store).unwrap();

        // delta = 100 / 50 = 2.0, so ((1.0 * 2.0) + 1.0) * 0.8 = 2.4
        assert_eq!(store.get(Metric::ConductivityRaw), 1000.0);
        let cond = store.get(Metric::Conductivity);
        assert!((cond - 2.4).abs() < 1e-9);
        assert!((0.0..=5.0).contains(&cond));
    }

    #[test]
    fn test_conductivity_delta_defaults_without_humidity() {
        let store = SensorStore::new(10);
        let decoder = Decoder::new();

        decoder.decode(Metric::Conductivity, &frame(1000), &store).unwrap();

        // delta = 1.0: ((1.0 * 1.0) + 1.0) * 0.8 = 1.6
        let cond = store.get(Metric::Conductivity);
        assert!((cond - 1.6).abs() < 1e-9);
    }

    #[test]
    fn test_conductivity_clamped_to_five() {
        let store = SensorStore::new(10);
        let decoder = Decoder::new();

        decoder.decode(Metric::Conductivity, &frame(65535), &store).unwrap();
        assert_eq!(store.get(Metric::Conductivity), 5.0);
    }

    #[test]
    fn test_salinity_and_tds_pass_through() {
        let store = SensorStore::new(10);
        let decoder = Decoder::new();

        decoder.decode(Metric::Salinity, &frame(1234), &store).unwrap();
        decoder.decode(Metric::Tds, &frame(876), &store).unwrap();
        assert_eq!(store.get(Metric::Salinity), 1234.0);
        assert_eq!(store.get(Metric::Tds), 876.0);
    }

    #[test]
    fn test_weighted_derived_when_both_inputs_present() {
        let store = SensorStore::new(10);
        let decoder = Decoder::new();

        decoder.decode(Metric::Temperature, &frame(200), &store).unwrap(); // 20 °C
        decoder.decode(Metric::Conductivity, &frame(1000), &store).unwrap();

        let cond = store.get(Metric::Conductivity);
        let expected = cond * (1.0 + 0.02 * (25.0 - 20.0));
        let weighted = store.get(Metric::ConductivityWeighted);
        assert!((weighted - expected).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_absent_without_temperature() {
        let store = SensorStore::new(10);
        let decoder = Decoder::new();

        decoder.decode(Metric::Conductivity, &frame(1000), &store).unwrap();
        assert_eq!(store.get(Metric::ConductivityWeighted), 0.0);
    }

    #[test]
    fn test_short_frame_rejected_without_store_update() {
        let store = SensorStore::new(10);
        let decoder = Decoder::new();

        let err = decoder
            .decode(Metric::Humidity, &[0x01, 0x03, 0x02], &store)
            .unwrap_err();
        assert!(matches!(err, HydrostatError::Decode(_)));
        assert_eq!(store.get(Metric::Humidity), 0.0);
    }

    #[test]
    fn test_derived_metric_is_not_decodable() {
        let store = SensorStore::new(10);
        let decoder = Decoder::new();

        let err = decoder
            .decode(Metric::ConductivityWeighted, &frame(1), &store)
            .unwrap_err();
        assert!(matches!(err, HydrostatError::Decode(_)));
    }

    #[test]
    fn test_alternate_compensation_is_pluggable() {
        let store = SensorStore::new(10);
        let decoder = Decoder::with_compensation(compensate_reciprocal);

        decoder.decode(Metric::Temperature, &frame(250), &store).unwrap(); // 25 °C
        decoder.decode(Metric::Conductivity, &frame(1000), &store).unwrap();

        let cond = store.get(Metric::Conductivity);
        let weighted = store.get(Metric::ConductivityWeighted);
        assert!((weighted - compensate_reciprocal(cond, 25.0)).abs() < 1e-9);
    }

    #[test]
    fn test_reciprocal_compensation_identity_at_zero() {
        assert_eq!(compensate_reciprocal(1.5, 0.0), 1.5);
    }
}

//! Rolling-window store for smoothed sensor readings.
//!
//! Raw soil-probe readings are noisy, so the store keeps a bounded FIFO
//! window of recent samples per metric and reports the arithmetic mean as the
//! current value. A metric that has never been set reads as 0.0; that is a
//! defined value, not an error, and downstream derivations rely on it (the
//! humidity-delta fallback in the conductivity decode).
//!
//! # Thread Safety
//!
//! One writer (the decode path) and several readers (script conditions, the
//! publish path) touch the store concurrently. A single mutex around the
//! whole map is sufficient at these rates; no critical section spans any I/O.

use crate::metric::{Metric, ALL_METRICS};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Default window capacity, matching the sensor's ~5 s poll cadence: roughly
/// eight minutes of history per metric.
pub const DEFAULT_WINDOW_CAPACITY: usize = 100;

/// Thread-safe per-metric rolling window of recent samples.
pub struct SensorStore {
    windows: Mutex<HashMap<Metric, VecDeque<f64>>>,
    capacity: usize,
}

impl SensorStore {
    /// Create a store whose windows hold at most `capacity` samples each.
    pub fn new(capacity: usize) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Append `value` to the metric's window, evicting the oldest sample if
    /// the window is at capacity.
    pub fn set(&self, metric: Metric, value: f64) {
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let window = windows
            .entry(metric)
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));
        if window.len() == self.capacity {
            window.pop_front();
        }
        window.push_back(value);
    }

    /// The mean of the metric's window, or 0.0 if the metric was never set.
    pub fn get(&self, metric: Metric) -> f64 {
        let windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match windows.get(&metric) {
            Some(window) if !window.is_empty() => {
                window.iter().sum::<f64>() / window.len() as f64
            }
            _ => 0.0,
        }
    }

    /// Current means for every metric, in ordinal order.
    ///
    /// Used to build telemetry payloads in one pass instead of taking the
    /// lock once per metric.
    pub fn snapshot(&self) -> Vec<(Metric, f64)> {
        let windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        ALL_METRICS
            .iter()
            .map(|&metric| {
                let mean = match windows.get(&metric) {
                    Some(window) if !window.is_empty() => {
                        window.iter().sum::<f64>() / window.len() as f64
                    }
                    _ => 0.0,
                };
                (metric, mean)
            })
            .collect()
    }

    /// The configured per-metric window capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for SensorStore {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untouched_metric_reads_zero() {
        let store = SensorStore::new(4);
        assert_eq!(store.get(Metric::Salinity), 0.0);
    }

    #[test]
    fn test_mean_over_window() {
        let store = SensorStore::new(4);
        store.set(Metric::Temperature, 10.0);
        store.set(Metric::Temperature, 20.0);
        store.set(Metric::Temperature, 30.0);
        assert_eq!(store.get(Metric::Temperature), 20.0);
    }

    #[test]
    fn test_fifo_eviction_keeps_last_n() {
        let store = SensorStore::new(3);
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            store.set(Metric::Humidity, v);
        }
        // Window now holds [3, 4, 5].
        assert_eq!(store.get(Metric::Humidity), 4.0);
    }

    #[test]
    fn test_window_never_exceeds_capacity() {
        let store = SensorStore::new(8);
        for i in 0..1000 {
            store.set(Metric::Tds, f64::from(i));
        }
        // Mean of the last 8 values 992..=999.
        assert_eq!(store.get(Metric::Tds), 995.5);
    }

    #[test]
    fn test_metrics_are_independent() {
        let store = SensorStore::new(4);
        store.set(Metric::Humidity, 50.0);
        store.set(Metric::Temperature, 21.0);
        assert_eq!(store.get(Metric::Humidity), 50.0);
        assert_eq!(store.get(Metric::Temperature), 21.0);
        assert_eq!(store.get(Metric::Conductivity), 0.0);
    }

    #[test]
    fn test_snapshot_covers_all_metrics() {
        let store = SensorStore::new(4);
        store.set(Metric::Humidity, 40.0);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), ALL_METRICS.len());
        assert!(snapshot.contains(&(Metric::Humidity, 40.0)));
        assert!(snapshot.contains(&(Metric::Tds, 0.0)));
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(SensorStore::new(100));

        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..500 {
                    store.set(Metric::Conductivity, f64::from(i));
                }
            })
        };
        let reader = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..500 {
                    let v = store.get(Metric::Conductivity);
                    assert!(v >= 0.0);
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();
    }
}

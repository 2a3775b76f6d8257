//! Durable key-value state storage.
//!
//! The actuator timers persist their full state after every transition so a
//! restart resumes from the last persisted span instead of re-running the
//! initialization behavior. The engine behind the [`StateStore`] trait is
//! deliberately opaque to the timers: they only need `upsert` and `get`,
//! with "not found" distinguished from real failures so first-run setup can
//! branch on it.
//!
//! [`JsonStateStore`] is the shipped implementation: one pretty-printed JSON
//! file per key, written to a temporary file and renamed into place so a
//! crash mid-write never leaves a torn state file. Each timer owns a distinct
//! key, so writes are never contended across timers.

use crate::error::{AppResult, HydrostatError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Opaque durable store consumed by the timer state machines.
pub trait StateStore: Send + Sync {
    /// Insert or replace the value stored under `key`.
    fn upsert<T: Serialize>(&self, key: &str, value: &T) -> AppResult<()>;

    /// Fetch the value stored under `key`.
    ///
    /// Returns [`HydrostatError::StateNotFound`] when the key has never been
    /// written; callers branch on that for first-run initialization.
    fn get<T: DeserializeOwned>(&self, key: &str) -> AppResult<T>;
}

/// File-backed store keeping one JSON document per key.
pub struct JsonStateStore {
    dir: PathBuf,
}

impl JsonStateStore {
    /// Open (creating if necessary) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> AppResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys become file names; timer names are plain identifiers, but a
        // path separator would escape the store directory.
        let safe: String = key
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    /// The directory this store writes into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl StateStore for JsonStateStore {
    fn upsert<T: Serialize>(&self, key: &str, value: &T) -> AppResult<()> {
        let payload = serde_json::to_vec_pretty(value)
            .map_err(|e| HydrostatError::Persistence(format!("serialize '{key}': {e}")))?;

        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, payload)
            .map_err(|e| HydrostatError::Persistence(format!("write '{key}': {e}")))?;
        fs::rename(&tmp, &path)
            .map_err(|e| HydrostatError::Persistence(format!("commit '{key}': {e}")))?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, key: &str) -> AppResult<T> {
        let path = self.path_for(key);
        let payload = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(HydrostatError::StateNotFound(key.to_string()));
            }
            Err(e) => {
                return Err(HydrostatError::Persistence(format!("read '{key}': {e}")));
            }
        };
        serde_json::from_slice(&payload)
            .map_err(|e| HydrostatError::Persistence(format!("deserialize '{key}': {e}")))
    }
}

/// In-memory store for tests and pinless dry runs. Same contract as
/// [`JsonStateStore`], no durability.
#[derive(Default)]
pub struct MemoryStateStore {
    entries: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn upsert<T: Serialize>(&self, key: &str, value: &T) -> AppResult<()> {
        let value = serde_json::to_value(value)
            .map_err(|e| HydrostatError::Persistence(format!("serialize '{key}': {e}")))?;
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, key: &str) -> AppResult<T> {
        let entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let value = entries
            .get(key)
            .ok_or_else(|| HydrostatError::StateNotFound(key.to_string()))?;
        serde_json::from_value(value.clone())
            .map_err(|e| HydrostatError::Persistence(format!("deserialize '{key}': {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Probe {
        name: String,
        count: u32,
    }

    #[test]
    fn test_json_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::open(dir.path()).unwrap();

        let probe = Probe { name: "pump1".into(), count: 3 };
        store.upsert("pump1", &probe).unwrap();

        let back: Probe = store.get("pump1").unwrap();
        assert_eq!(back, probe);
    }

    #[test]
    fn test_missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::open(dir.path()).unwrap();

        let err = store.get::<Probe>("absent").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_upsert_replaces_existing_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::open(dir.path()).unwrap();

        store.upsert("k", &Probe { name: "a".into(), count: 1 }).unwrap();
        store.upsert("k", &Probe { name: "b".into(), count: 2 }).unwrap();

        let back: Probe = store.get("k").unwrap();
        assert_eq!(back.name, "b");
        assert_eq!(back.count, 2);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = JsonStateStore::open(dir.path()).unwrap();
            store.upsert("k", &Probe { name: "a".into(), count: 9 }).unwrap();
        }
        let store = JsonStateStore::open(dir.path()).unwrap();
        let back: Probe = store.get("k").unwrap();
        assert_eq!(back.count, 9);
    }

    #[test]
    fn test_key_cannot_escape_store_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::open(dir.path()).unwrap();

        store
            .upsert("../escape", &Probe { name: "x".into(), count: 0 })
            .unwrap();
        let back: Probe = store.get("../escape").unwrap();
        assert_eq!(back.name, "x");
        assert!(!dir.path().parent().unwrap().join("escape.json").exists());
    }

    #[test]
    fn test_memory_store_contract_matches() {
        let store = MemoryStateStore::new();
        assert!(store.get::<Probe>("k").unwrap_err().is_not_found());
        store.upsert("k", &Probe { name: "m".into(), count: 5 }).unwrap();
        let back: Probe = store.get("k").unwrap();
        assert_eq!(back.count, 5);
    }
}

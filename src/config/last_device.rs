//! Persistence of the last selected device.
//!
//! The slot is a convenience cache: storage failures are logged and treated
//! as "nothing saved", never surfaced to the caller.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use serde_json::{Map, Value};

use crate::core::bluetooth::constants::LAST_DEVICE_KEY;
use crate::core::bluetooth::types::DeviceAddress;
use crate::core::error::StoreError;
use crate::utils::ensure_directory_exists;

/// Minimal string key/value persistence.
pub trait KeyValueStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

impl<T: KeyValueStore> KeyValueStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value)
    }
}

/// Flat JSON object on disk, rewritten whole on every `set`.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within the process.
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, StoreError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        let entries: Map<String, Value> = serde_json::from_str(&raw)?;
        Ok(entries
            .into_iter()
            .filter_map(|(key, value)| match value {
                Value::String(value) => Some((key, value)),
                other => {
                    debug!("Ignoring non-string entry {key}: {other}");
                    None
                }
            })
            .collect())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        // Unreadable contents are replaced.
        let mut entries = self.read_all().unwrap_or_else(|e| {
            warn!("Discarding unreadable {}: {e}", self.path.display());
            BTreeMap::new()
        });
        entries.insert(key.to_string(), value.to_string());

        if let Some(dir) = self.path.parent() {
            ensure_directory_exists(dir)?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, serde_json::to_string_pretty(&entries)?)?;
        fs::rename(&tmp_path, &self.path)?;
        debug!("Stored {key} in {}", self.path.display());
        Ok(())
    }
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// The single "last device" slot.
pub struct LastDeviceStore<S> {
    store: S,
}

impl<S: KeyValueStore> LastDeviceStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Overwrites the slot.
    pub fn save(&self, address: &DeviceAddress) {
        match self.store.set(LAST_DEVICE_KEY, address.as_str()) {
            Ok(()) => info!("Saved {address} as last device"),
            Err(e) => warn!("Failed to save last device {address}: {e}"),
        }
    }

    pub fn load(&self) -> Option<DeviceAddress> {
        match self.store.get(LAST_DEVICE_KEY) {
            Ok(value) => value.as_deref().and_then(DeviceAddress::parse),
            Err(e) => {
                warn!("Failed to read last device: {e}");
                None
            }
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

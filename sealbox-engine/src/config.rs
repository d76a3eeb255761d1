//! Hot-reloadable system configuration.
//!
//! Values live in the `system_config` table and are cached in memory.
//! Subscribers register per-key watchers; `set` writes through, swaps the
//! cache, then invokes a snapshot of the watcher list *after* releasing the
//! lock, so a watcher can never deadlock against the manager.

use crate::error::EngineResult;
use sealbox_store::ConfigStore;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Batch size for the rotation migration loop.
pub const CONFIG_KEY_ROTATION_BATCH_SIZE: &str = "key_rotation.batch_size";

/// Sleep between migration batches, in milliseconds.
pub const CONFIG_KEY_ROTATION_BATCH_SLEEP_MS: &str = "key_rotation.batch_sleep_ms";

/// Callback invoked with `(old_value, new_value)` after a key changes.
pub type ConfigWatcher = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// In-memory cache over [`ConfigStore`] with change notification.
pub struct ConfigManager {
    store: ConfigStore,
    cache: RwLock<HashMap<String, String>>,
    watchers: RwLock<HashMap<String, Vec<ConfigWatcher>>>,
}

impl ConfigManager {
    /// Builds the manager and warms the cache from the store.
    pub fn new(store: ConfigStore) -> EngineResult<Self> {
        let cache: HashMap<String, String> = store.load_all()?.into_iter().collect();
        info!(config_count = cache.len(), "config manager initialized");
        Ok(Self {
            store,
            cache: RwLock::new(cache),
            watchers: RwLock::new(HashMap::new()),
        })
    }

    /// Returns the cached value, falling back to the store on a miss.
    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.cache.read().unwrap().get(key) {
            return Some(value.clone());
        }

        let value = self.store.get(key).ok().flatten()?;
        self.cache
            .write()
            .unwrap()
            .insert(key.to_string(), value.clone());
        Some(value)
    }

    /// Returns the value for `key`, or `default` if unset.
    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// Writes a value through to the store, updates the cache, and notifies
    /// watchers of the key outside the lock.
    pub fn set(&self, key: &str, value: &str) -> EngineResult<()> {
        self.store.set(key, value)?;

        let old_value = {
            let mut cache = self.cache.write().unwrap();
            cache
                .insert(key.to_string(), value.to_string())
                .unwrap_or_default()
        };

        // Snapshot the watcher list so callbacks run without any lock held
        let callbacks: Vec<ConfigWatcher> = self
            .watchers
            .read()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default();

        info!(key, old_value, new_value = value, "config updated");
        for callback in callbacks {
            callback(&old_value, value);
        }

        Ok(())
    }

    /// Registers a watcher invoked on every change of `key`.
    pub fn watch(&self, key: &str, watcher: ConfigWatcher) {
        debug!(key, "config watcher registered");
        self.watchers
            .write()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push(watcher);
    }
}

//! In-memory storage adapter.
//!
//! Implements [`StoragePort`] and [`ConfigPort`] over a `HashMap` keyed by
//! `namespace::key`. Used by the simulator and the test suites; a
//! platform adapter (flash, SQLite, keystore) implements the same ports.

use std::cell::RefCell;
use std::collections::HashMap;

use log::info;

use crate::app::ports::{ConfigError, ConfigPort, StorageError, StoragePort};
use crate::config::{SystemConfig, validate_config};

const CONFIG_NAMESPACE: &str = "config";
const CONFIG_KEY: &str = "syscfg";

#[derive(Debug, Default)]
pub struct MemStore {
    store: RefCell<HashMap<String, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }

    /// Number of stored keys in `namespace`.
    pub fn count(&self, namespace: &str) -> usize {
        let prefix = format!("{}::", namespace);
        self.store
            .borrow()
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .count()
    }
}

impl ConfigPort for MemStore {
    fn load(&self) -> Result<SystemConfig, ConfigError> {
        let key = Self::composite_key(CONFIG_NAMESPACE, CONFIG_KEY);
        if let Some(bytes) = self.store.borrow().get(&key) {
            let cfg: SystemConfig = postcard::from_bytes(bytes).map_err(|_| ConfigError::Corrupted)?;
            info!("MemStore: loaded config");
            Ok(cfg)
        } else {
            info!("MemStore: no stored config, using defaults");
            Ok(SystemConfig::default())
        }
    }

    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError> {
        validate_config(config)?;
        let key = Self::composite_key(CONFIG_NAMESPACE, CONFIG_KEY);
        let bytes = postcard::to_allocvec(config).map_err(|_| ConfigError::IoError)?;
        self.store.borrow_mut().insert(key, bytes);
        info!("MemStore: config saved");
        Ok(())
    }
}

impl StoragePort for MemStore {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let composite = Self::composite_key(namespace, key);
        match self.store.borrow().get(&composite) {
            Some(data) if data.len() > buf.len() => Err(StorageError::Corrupted),
            Some(data) => {
                buf[..data.len()].copy_from_slice(data);
                Ok(data.len())
            }
            None => Err(StorageError::NotFound),
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let composite = Self::composite_key(namespace, key);
        self.store.borrow_mut().insert(composite, data.to_vec());
        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.store
            .borrow_mut()
            .remove(&Self::composite_key(namespace, key));
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.store
            .borrow()
            .contains_key(&Self::composite_key(namespace, key))
    }
}

use tutorchat_engine::{KeyValueStorage, StorageError};
use web_sys::Storage;

use crate::utils::describe_js;

/// `window.localStorage` as a [`KeyValueStorage`]
pub struct LocalStorage {
    storage: Storage,
}

impl LocalStorage {
    pub fn new() -> Result<Self, StorageError> {
        let window = crate::window().map_err(|e| StorageError::Unavailable(describe_js(&e)))?;
        let storage = window
            .local_storage()
            .map_err(|e| StorageError::Unavailable(describe_js(&e)))?
            .ok_or_else(|| StorageError::Unavailable("localStorage is disabled".to_string()))?;
        Ok(Self { storage })
    }
}

impl KeyValueStorage for LocalStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.storage
            .get_item(key)
            .map_err(|e| StorageError::Unavailable(describe_js(&e)))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        // setItem only throws when the origin's quota is exhausted
        self.storage.set_item(key, value).map_err(|e| {
            log::warn!("localStorage write of {} failed: {}", key, describe_js(&e));
            StorageError::QuotaExceeded(key.to_string())
        })
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.storage
            .remove_item(key)
            .map_err(|e| StorageError::Unavailable(describe_js(&e)))
    }
}

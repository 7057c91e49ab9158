//! Typed, failure-absorbing access to the host key/value storage.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{KeyValueStorage, StorageResult};

/// Wraps a [`KeyValueStorage`] behind a read/write/clear contract that never fails.
///
/// Backend errors (quota exceeded, access denied) and corrupted payloads are logged and turned
/// into sentinel values: `None` for reads, `false` for writes and clears. Everything above this
/// layer is therefore backend-agnostic and never has to handle a storage error.
#[derive(Clone)]
pub struct PersistentStateStore {
    backend: Arc<dyn KeyValueStorage>,
}

impl fmt::Debug for PersistentStateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentStateStore").finish_non_exhaustive()
    }
}

impl PersistentStateStore {
    /// Wraps `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn KeyValueStorage>) -> Self {
        Self { backend }
    }

    /// Reads the raw value under `key`. Absent and unreadable both read as `None`.
    #[must_use]
    pub fn read(&self, key: &str) -> Option<String> {
        self.try_read(key).unwrap_or_else(|err| {
            log::warn!("storage read of {key} failed: {err}");
            None
        })
    }

    /// Reads the raw value under `key`, keeping the backend error.
    ///
    /// Used by the cross-context watcher, which backs off on repeated read failures.
    pub(crate) fn try_read(&self, key: &str) -> StorageResult<Option<String>> {
        self.backend.get_item(key.to_string())
    }

    /// Replaces the value under `key`. Returns `false` if the backend refused the write.
    pub fn write(&self, key: &str, value: &str) -> bool {
        match self.backend.set_item(key.to_string(), value.to_string()) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("storage write of {key} failed: {err}");
                false
            }
        }
    }

    /// Removes `key`. Returns `false` if the backend refused the delete.
    pub fn clear(&self, key: &str) -> bool {
        match self.backend.remove_item(key.to_string()) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("storage clear of {key} failed: {err}");
                false
            }
        }
    }

    /// Reads and decodes a JSON value. Absent, unreadable and corrupt values read as `None`.
    #[must_use]
    pub fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.read(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                log::warn!("discarding corrupted value under {key}: {err}");
                None
            }
        }
    }

    /// Encodes `value` as JSON and writes it. Returns `false` on any failure.
    pub fn write_json<T: Serialize>(&self, key: &str, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(raw) => self.write(key, &raw),
            Err(err) => {
                log::warn!("failed to encode value for {key}: {err}");
                false
            }
        }
    }
}

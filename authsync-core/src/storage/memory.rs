//! In-memory implementation of [`KeyValueStorage`].
//!
//! Designed for unit and integration tests and for hosts without persistent storage. Several
//! stores built over the same `Arc<MemoryStorage>` behave like several browsing contexts sharing
//! one origin.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use super::{KeyValueStorage, StorageError, StorageResult};

/// In-memory key/value store backed by a `HashMap`.
///
/// Reads and writes can be made to fail on demand to exercise the fault tolerance of the layers
/// above.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RwLock<HashMap<String, String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    write_count: AtomicU64,
}

impl MemoryStorage {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent read fail (or succeed again).
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent write and delete fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::SeqCst)
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.read().map_or(0, |items| items.len())
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::QuotaExceeded(
                "memory storage is read-only".to_string(),
            ));
        }
        Ok(())
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get_item(&self, key: String) -> StorageResult<Option<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::AccessDenied(format!("read of {key} refused")));
        }
        let items = self
            .items
            .read()
            .map_err(|_| StorageError::Backend("lock poisoned".to_string()))?;
        Ok(items.get(&key).cloned())
    }

    fn set_item(&self, key: String, value: String) -> StorageResult<()> {
        self.check_writable()?;
        self.items
            .write()
            .map_err(|_| StorageError::Backend("lock poisoned".to_string()))?
            .insert(key, value);
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove_item(&self, key: String) -> StorageResult<()> {
        self.check_writable()?;
        self.items
            .write()
            .map_err(|_| StorageError::Backend("lock poisoned".to_string()))?
            .remove(&key);
        Ok(())
    }
}

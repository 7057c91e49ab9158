//! Platform interfaces for persistent storage.

use super::error::StorageResult;

/// Origin-scoped, synchronous, string-keyed storage shared by every context of the application.
///
/// Writes from one context become visible to the others on their next read; there is no change
/// notification and no locking.
#[uniffi::export(with_foreign)]
pub trait KeyValueStorage: Send + Sync {
    /// Reads the value stored under `key`, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get_item(&self, key: String) -> StorageResult<Option<String>>;

    /// Replaces the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails (quota, access denied).
    fn set_item(&self, key: String, value: String) -> StorageResult<()>;

    /// Removes `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn remove_item(&self, key: String) -> StorageResult<()>;
}

//! Error types for storage components.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by storage primitives.
///
/// These never leave [`super::PersistentStateStore`]; they are logged there and turned into
/// "no value" / "not written".
#[derive(Debug, Error, uniffi::Error)]
pub enum StorageError {
    /// Generic failure of the host storage backend.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// The backend ran out of space.
    #[error("storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The backend refused access (private browsing, disabled storage, sandbox).
    #[error("storage access denied: {0}")]
    AccessDenied(String),

    /// Serialization/deserialization failures.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Unsupported envelope version.
    #[error("unsupported envelope version: {0}")]
    UnsupportedEnvelopeVersion(u64),

    /// Unexpected `UniFFI` callback error.
    #[error("unexpected uniffi callback error: {0}")]
    UnexpectedUniFFICallbackError(String),
}

impl From<uniffi::UnexpectedUniFFICallbackError> for StorageError {
    fn from(error: uniffi::UnexpectedUniFFICallbackError) -> Self {
        Self::UnexpectedUniFFICallbackError(error.reason)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

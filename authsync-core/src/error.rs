use strum::{Display, EnumString};
use thiserror::Error;

use crate::storage::StorageError;

/// Coarse classification of every failure the core can observe.
///
/// The category decides propagation: `storage` failures are absorbed where they happen,
/// `navigation` failures always reach the caller, the rest are surfaced as data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, uniffi::Enum)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
    /// Missing or invalid environment configuration. Not retryable.
    Environment,
    /// Transport failure. Retryable.
    Network,
    /// Invalid caller supplied configuration. Not retryable.
    Configuration,
    /// Failure reported by the identity provider.
    Auth,
    /// Persistent storage failure. Always handled locally.
    Storage,
    /// The platform refused or failed a navigation.
    Navigation,
    /// Anything else.
    Unknown,
}

impl ErrorCategory {
    /// Whether retrying the same operation may succeed.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Network)
    }
}

/// Error outputs from `AuthSync`
#[derive(Debug, Error, uniffi::Error)]
pub enum AuthSyncError {
    /// The runtime environment is missing something the core needs.
    #[error("environment_error: {0}")]
    Environment(String),
    /// Network connection error with details
    #[error("network_error: {0}")]
    Network(String),
    /// The supplied configuration is not valid.
    #[error("configuration_error: {0}")]
    Configuration(String),
    /// The identity provider reported a failure.
    #[error("auth_error: {0}")]
    Auth(String),
    /// Storage failure that could not be absorbed.
    #[error("storage_error: {0}")]
    Storage(String),
    /// Navigation could not be performed. Fatal for the current flow.
    #[error("navigation_error: redirect to {provider} failed: {reason}")]
    Navigation {
        /// Provider or destination the navigation was heading to.
        provider: String,
        /// Platform supplied reason.
        reason: String,
    },
    /// Unexpected error
    #[error("unknown_error: {0}")]
    Unknown(String),
}

impl AuthSyncError {
    /// Returns the taxonomy bucket for this error.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Environment(_) => ErrorCategory::Environment,
            Self::Network(_) => ErrorCategory::Network,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Auth(_) => ErrorCategory::Auth,
            Self::Storage(_) => ErrorCategory::Storage,
            Self::Navigation { .. } => ErrorCategory::Navigation,
            Self::Unknown(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether retrying the same operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Text that is safe to show to the user.
    ///
    /// Provider messages are passed through; everything else is replaced with a generic message
    /// so internal details never reach the UI.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Auth(message) => message.clone(),
            Self::Network(_) => {
                "We could not reach the server. Check your connection and try again.".to_string()
            }
            Self::Navigation { .. } => {
                "We could not finish signing you in. Please sign in again.".to_string()
            }
            Self::Environment(_) | Self::Configuration(_) => {
                "Sign-in is not available right now.".to_string()
            }
            Self::Storage(_) | Self::Unknown(_) => {
                "Something went wrong. Please try again.".to_string()
            }
        }
    }
}

impl From<StorageError> for AuthSyncError {
    fn from(error: StorageError) -> Self {
        Self::Storage(error.to_string())
    }
}

impl From<uniffi::UnexpectedUniFFICallbackError> for AuthSyncError {
    fn from(error: uniffi::UnexpectedUniFFICallbackError) -> Self {
        Self::Unknown(error.reason)
    }
}

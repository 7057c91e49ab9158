//! The single canonical authentication state shared by every context of the origin.

use serde::{Deserialize, Serialize};
use strum::Display;

mod envelope;
mod store;
mod watcher;

pub use envelope::{EnvelopeMetadata, StoredAuthState, CURRENT_ENVELOPE_VERSION};
pub use store::{AuthStateListener, AuthStateStore};

/// Authentication status of the current user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize, uniffi::Enum)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AuthStatus {
    /// A user is signed in.
    Authenticated,
    /// Nobody is signed in.
    Unauthenticated,
    /// A flow is in progress in some context.
    Pending,
}

/// Which context produced a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize, uniffi::Enum)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AuthSource {
    /// The origin context itself.
    Internal,
    /// A detached context (popup, redirected tab, app window).
    External,
}

/// Current authentication state. Replaced wholesale, never patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    /// Status at `timestamp`.
    pub status: AuthStatus,
    /// Creation time in epoch milliseconds.
    pub timestamp: u64,
    /// Identifier of the signed in user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Opaque session token handed over by the provider callback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    /// Context that produced this state.
    pub source: AuthSource,
}

impl AuthState {
    /// An authenticated state for `user_id` created at `now`.
    #[must_use]
    pub const fn authenticated(
        user_id: String,
        session_token: Option<String>,
        source: AuthSource,
        now: u64,
    ) -> Self {
        Self {
            status: AuthStatus::Authenticated,
            timestamp: now,
            user_id: Some(user_id),
            session_token,
            source,
        }
    }

    /// An unauthenticated state created at `now`.
    #[must_use]
    pub const fn unauthenticated(source: AuthSource, now: u64) -> Self {
        Self {
            status: AuthStatus::Unauthenticated,
            timestamp: now,
            user_id: None,
            session_token: None,
            source,
        }
    }

    /// Whether the state is older than `max_age_ms` at `now`.
    ///
    /// A timestamp in the future (clock skew between contexts) counts as fresh.
    #[must_use]
    pub const fn is_stale(&self, now: u64, max_age_ms: u64) -> bool {
        now.saturating_sub(self.timestamp) > max_age_ms
    }
}

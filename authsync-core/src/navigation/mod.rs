//! Post-authentication navigation: where to send the user, and getting them there.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::AuthSyncError;

mod controller;
mod paths;

pub use controller::{NavigationController, RedirectListener, RedirectOutcome, RedirectRequest};
pub use paths::{get_redirect_path, is_auth_page, is_role_restricted, LOGIN_PATH};

/// How a navigation is issued. Platforms may map both to the same call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, uniffi::Enum)]
#[strum(serialize_all = "lowercase")]
pub enum NavigationMechanism {
    /// Direct location assignment.
    Primary,
    /// Alternate mechanism used when the primary one could not be verified, e.g. a location
    /// replace or a router push.
    Fallback,
}

/// Navigation capability of the host.
#[uniffi::export(with_foreign)]
pub trait Navigator: Send + Sync {
    /// Issues a navigation to `path` (a path or an absolute URL).
    ///
    /// # Errors
    ///
    /// Returns an error if the platform refused the navigation.
    fn navigate(&self, path: String, mechanism: NavigationMechanism) -> Result<(), AuthSyncError>;

    /// Whether the current location is `path`.
    fn verify_navigated(&self, path: String) -> bool;

    /// Closes the current context (popup or app window). No-op where not applicable.
    fn close(&self);
}

/// Role of the signed in user, as reported by the profile service.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize, uniffi::Enum,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UserRole {
    /// Privileged role with access to the administrative area.
    Admin,
    /// Standard user.
    User,
}

impl UserRole {
    /// Landing page used when no previous path applies.
    #[must_use]
    pub const fn default_path(self) -> &'static str {
        match self {
            Self::Admin => "/admin",
            Self::User => "/",
        }
    }
}

/// The slice of the user profile navigation decisions depend on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Profile identifier, if known.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Role used for defaults and restrictions.
    pub role: UserRole,
}

impl UserProfile {
    /// A profile carrying only a role.
    #[must_use]
    pub const fn with_role(role: UserRole) -> Self {
        Self {
            user_id: None,
            role,
        }
    }
}

/// Why a redirect cycle started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, uniffi::Enum)]
#[strum(serialize_all = "lowercase")]
pub enum RedirectReason {
    /// After a successful sign in.
    Login,
    /// After sign out.
    Logout,
    /// The flow could not make progress.
    Timeout,
    /// Recovery after an error.
    Error,
}

/// Ephemeral state of the redirect cycle in progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, uniffi::Record)]
pub struct NavigationState {
    /// A redirect cycle is running.
    pub is_redirecting: bool,
    /// Target of the cycle.
    pub redirect_path: Option<String>,
    /// Why the cycle started.
    pub redirect_reason: Option<RedirectReason>,
    /// Start of the latest attempt, epoch milliseconds.
    pub timestamp: u64,
    /// Attempts made so far in this cycle.
    pub attempt: u32,
    /// Failure of the latest attempt.
    pub last_error: Option<String>,
}

//! Composition root wiring every component over one storage backend.

use std::sync::Arc;
use std::time::Instant;

use crate::auth_state::AuthStateStore;
use crate::config::AuthSyncConfig;
use crate::error::AuthSyncError;
use crate::navigation::{
    NavigationController, NavigationMechanism, Navigator, RedirectOutcome, RedirectReason,
    RedirectRequest, UserProfile,
};
use crate::redirection::{parse_return_url, RedirectionCodec};
use crate::session_health::{
    CookieStatus, RecoveryAction, RecoveryPriority, RecoveryRecommendation,
    SessionPersistenceStateManager, SyncErrorKind,
};
use crate::storage::{KeyValueStorage, PersistentStateStore};
use crate::utils::duration_to_ms;

/// User-visible recovery message, delivered to the host's notification surface.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct RecoveryNotice {
    /// Text safe to show to the user.
    pub message: String,
    /// What the core decided to do.
    pub action: RecoveryAction,
    /// How urgently the user should act.
    pub priority: RecoveryPriority,
    /// Whether the UI should offer a "try again" affordance.
    pub retryable: bool,
}

/// Where user-visible recovery messages go (toast, banner, system notification).
#[uniffi::export(with_foreign)]
pub trait NotificationSink: Send + Sync {
    /// Shows `notice` to the user.
    fn notify(&self, notice: RecoveryNotice);
}

/// Result of [`AuthSync::handle_auth_callback`].
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Enum)]
pub enum CallbackOutcome {
    /// The user was signed in and sent to `path`.
    Redirected {
        /// Where the user landed.
        path: String,
        /// Whether the fallback mechanism got them there.
        used_fallback: bool,
    },
    /// The user was signed in, the first redirect attempt failed and retries are scheduled.
    RedirectPending {
        /// Failure of the first attempt.
        last_error: String,
        /// Delay before the next attempt.
        retry_in_ms: u64,
    },
    /// The user was signed in but every redirect attempt failed; they stay on the callback page.
    RedirectAbandoned {
        /// Failure of the last attempt.
        last_error: String,
    },
    /// The redirect was cancelled by a timeout or teardown.
    RedirectCancelled,
    /// Reconciliation or the redirect failed and the recovery policy was applied.
    Recovery {
        /// What the policy decided.
        recommendation: RecoveryRecommendation,
    },
}

fn notice_for(recommendation: &RecoveryRecommendation) -> RecoveryNotice {
    let message = match recommendation.action {
        RecoveryAction::Retry => "Sign-in did not complete. Please try again.",
        RecoveryAction::Regenerate => "Your session needs to be refreshed. Please try again.",
        RecoveryAction::Clear => "Your saved session was reset. Please sign in again.",
        RecoveryAction::Reauth => "Your session could not be restored. Please sign in again.",
    };
    RecoveryNotice {
        message: message.to_string(),
        action: recommendation.action,
        priority: recommendation.priority,
        retryable: recommendation.action == RecoveryAction::Retry,
    }
}

/// One client instance: the auth state store, the return URL codec, the session health manager
/// and the navigation controller, sharing one storage backend and one navigator.
///
/// Create one per browsing context. Every timer it starts is released by [`AuthSync::destroy`].
#[derive(uniffi::Object)]
pub struct AuthSync {
    config: AuthSyncConfig,
    navigator: Arc<dyn Navigator>,
    notifications: Arc<dyn NotificationSink>,
    auth_state: Arc<AuthStateStore>,
    redirection: Arc<RedirectionCodec>,
    health: Arc<SessionPersistenceStateManager>,
    navigation: Arc<NavigationController>,
}

#[uniffi::export(async_runtime = "tokio")]
impl AuthSync {
    /// Validates `config` and builds every component.
    ///
    /// # Errors
    ///
    /// Returns [`AuthSyncError::Configuration`] if `config` is invalid.
    #[uniffi::constructor]
    pub fn new(
        storage: Arc<dyn KeyValueStorage>,
        navigator: Arc<dyn Navigator>,
        notifications: Arc<dyn NotificationSink>,
        config: AuthSyncConfig,
    ) -> Result<Self, AuthSyncError> {
        config.validate()?;
        let store = PersistentStateStore::new(storage);
        let auth_state = Arc::new(AuthStateStore::with_store(
            store.clone(),
            config.polling.clone(),
        ));
        let redirection = Arc::new(RedirectionCodec::with_store(
            store.clone(),
            Arc::clone(&navigator),
            config.redirection.clone(),
        ));
        let health = Arc::new(SessionPersistenceStateManager::with_store(
            store,
            config.health.clone(),
        ));
        health.cleanup();
        let navigation = Arc::new(NavigationController::with_health(
            Arc::clone(&navigator),
            config.redirect.clone(),
            config.redirection.fallback_enabled,
            Arc::clone(&health),
        ));
        log::info!("auth sync client ready for {}", config.redirection.base_url);

        Ok(Self {
            config,
            navigator,
            notifications,
            auth_state,
            redirection,
            health,
            navigation,
        })
    }

    /// Starts watching for auth state written by other contexts.
    ///
    /// # Errors
    ///
    /// Returns [`AuthSyncError::Environment`] when called outside a tokio runtime.
    pub fn start(&self) -> Result<(), AuthSyncError> {
        self.auth_state.start_polling()
    }

    /// Handles the return URL of a flow that completed in a detached context.
    ///
    /// A successful outcome is persisted, counted as a healthy sync and followed by the
    /// post-login redirect, whose failed attempts feed the same health record. A failed outcome
    /// (or one that could not be persisted) is recorded as a sync error, counted as a recovery
    /// attempt and answered with the recovery policy's recommendation: the user is notified and
    /// `reauth` sends them back to the login page.
    ///
    /// # Errors
    ///
    /// Returns [`AuthSyncError::Navigation`] if a forced login redirect failed.
    pub async fn handle_auth_callback(
        &self,
        url: String,
        profile: UserProfile,
        previous_path: Option<String>,
    ) -> Result<CallbackOutcome, AuthSyncError> {
        let started = Instant::now();
        let result = parse_return_url(&url);
        let stored = self
            .auth_state
            .set_auth_state(self.redirection.to_auth_state(result.clone()));
        let synced = result.success && stored;
        self.health
            .record_sync_attempt(duration_to_ms(started.elapsed()), synced);

        if synced {
            self.health.reset_recovery();
            let outcome = self
                .navigation
                .handle_post_login_redirect(RedirectRequest::new(profile, previous_path))
                .await;
            return Ok(match outcome {
                RedirectOutcome::Redirected {
                    path,
                    used_fallback,
                    ..
                } => CallbackOutcome::Redirected {
                    path,
                    used_fallback,
                },
                RedirectOutcome::RetryScheduled {
                    last_error,
                    retry_in_ms,
                    ..
                } => CallbackOutcome::RedirectPending {
                    last_error,
                    retry_in_ms,
                },
                RedirectOutcome::GaveUp { last_error, .. } => {
                    CallbackOutcome::RedirectAbandoned { last_error }
                }
                RedirectOutcome::LoginRequired { recommendation } => {
                    self.auth_state.clear_auth_state();
                    self.notifications.notify(notice_for(&recommendation));
                    CallbackOutcome::Recovery { recommendation }
                }
                RedirectOutcome::Cancelled => CallbackOutcome::RedirectCancelled,
            });
        }

        let (kind, message, recoverable) = if result.success {
            (
                SyncErrorKind::Storage,
                "auth state could not be persisted".to_string(),
                true,
            )
        } else {
            (
                SyncErrorKind::SessionSync,
                result
                    .error
                    .unwrap_or_else(|| "authentication failed".to_string()),
                false,
            )
        };
        self.health.add_sync_error(kind, message, recoverable);
        self.health.record_recovery_attempt();
        let recommendation = self.health.get_recovery_recommendation();
        log::warn!(
            "auth callback failed; recommending {} ({}): {}",
            recommendation.action,
            recommendation.priority,
            recommendation.reason
        );
        self.notifications.notify(notice_for(&recommendation));
        self.apply(&recommendation)?;
        Ok(CallbackOutcome::Recovery { recommendation })
    }

    /// Signs the user out in this and every other context and returns to the login page.
    ///
    /// # Errors
    ///
    /// Returns [`AuthSyncError::Navigation`] if the login redirect failed.
    pub fn logout(&self) -> Result<(), AuthSyncError> {
        self.auth_state.clear_auth_state();
        self.health.reset();
        self.navigation.force_login(RedirectReason::Logout)
    }

    /// Shows the verified page, then moves on to the role default after the configured delay.
    ///
    /// # Errors
    ///
    /// Returns [`AuthSyncError::Navigation`] if the verified page could not be shown and
    /// [`AuthSyncError::Environment`] outside a tokio runtime.
    #[allow(clippy::needless_pass_by_value)]
    pub fn show_verified_page(&self, profile: UserProfile) -> Result<(), AuthSyncError> {
        let url = self.redirection.verified_page_url()?;
        self.navigator
            .navigate(url.clone(), NavigationMechanism::Primary)
            .map_err(|err| AuthSyncError::Navigation {
                provider: url,
                reason: err.to_string(),
            })?;
        self.navigation.schedule_redirect(
            profile.role.default_path().to_string(),
            self.redirection.auto_redirect_delay_ms(),
        )
    }

    /// The shared auth state store.
    #[must_use]
    pub fn auth_state(&self) -> Arc<AuthStateStore> {
        Arc::clone(&self.auth_state)
    }

    /// The return URL codec.
    #[must_use]
    pub fn redirection(&self) -> Arc<RedirectionCodec> {
        Arc::clone(&self.redirection)
    }

    /// The session health manager.
    #[must_use]
    pub fn health(&self) -> Arc<SessionPersistenceStateManager> {
        Arc::clone(&self.health)
    }

    /// The navigation controller.
    #[must_use]
    pub fn navigation(&self) -> Arc<NavigationController> {
        Arc::clone(&self.navigation)
    }

    /// The configuration the client was built with.
    #[must_use]
    pub fn config(&self) -> AuthSyncConfig {
        self.config.clone()
    }

    /// Stops the watcher and cancels every pending redirect timer.
    pub fn destroy(&self) {
        self.auth_state.destroy();
        self.navigation.destroy();
    }
}

impl AuthSync {
    fn apply(&self, recommendation: &RecoveryRecommendation) -> Result<(), AuthSyncError> {
        match recommendation.action {
            RecoveryAction::Retry => Ok(()),
            RecoveryAction::Regenerate => {
                self.health.update_cookie_status(CookieStatus::Missing);
                Ok(())
            }
            RecoveryAction::Clear => {
                self.auth_state.clear_auth_state();
                self.health.update_cookie_status(CookieStatus::Missing);
                Ok(())
            }
            RecoveryAction::Reauth => {
                self.auth_state.clear_auth_state();
                self.navigation.force_login(RedirectReason::Error)
            }
        }
    }
}

impl Drop for AuthSync {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_retry_is_retryable() {
        for (action, retryable) in [
            (RecoveryAction::Retry, true),
            (RecoveryAction::Regenerate, false),
            (RecoveryAction::Clear, false),
            (RecoveryAction::Reauth, false),
        ] {
            let notice = notice_for(&RecoveryRecommendation {
                action,
                priority: RecoveryPriority::Low,
                reason: String::new(),
            });
            assert_eq!(notice.retryable, retryable);
            assert!(!notice.message.is_empty());
        }
    }
}

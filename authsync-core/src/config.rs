//! Configuration surface recognized by the core.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::AuthSyncError;

/// Deployment the host application is running in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, uniffi::Enum)]
#[strum(serialize_all = "lowercase")]
pub enum Environment {
    /// Local development server.
    Development,
    /// Pre-production deployment.
    Staging,
    /// Live deployment.
    Production,
}

/// Default origin used for development when no base URL is provided.
pub const DEVELOPMENT_BASE_URL: &str = "http://localhost:3000";

/// Governs how aggressively the cross-context watcher detects state written by other contexts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, uniffi::Record)]
#[serde(default, rename_all = "camelCase")]
pub struct PollingConfig {
    /// Delay between two reads of the shared store.
    pub interval_ms: u64,
    /// Age after which a stored state is treated as absent.
    pub max_age_ms: u64,
    /// Consecutive read failures tolerated before the watcher parks.
    pub retry_attempts: u32,
    /// Factor applied to the interval after each consecutive read failure.
    pub backoff_multiplier: f64,
}

impl PollingConfig {
    /// Checks the bounds the watcher relies on.
    ///
    /// # Errors
    ///
    /// Returns [`AuthSyncError::Configuration`] naming the first invalid field.
    pub fn validate(&self) -> Result<(), AuthSyncError> {
        if self.interval_ms == 0 {
            return Err(invalid("polling.intervalMs", "must be greater than zero"));
        }
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0) {
            return Err(invalid(
                "polling.backoffMultiplier",
                "must be a finite number >= 1",
            ));
        }
        Ok(())
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            max_age_ms: 5 * 60 * 1_000,
            retry_attempts: 3,
            backoff_multiplier: 2.0,
        }
    }
}

/// Where the detached context and the verified page send the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
#[serde(default, rename_all = "camelCase")]
pub struct RedirectionConfig {
    /// Origin of the application, e.g. `https://rooms.example.com`.
    pub base_url: String,
    /// Page shown once an email verification completes.
    pub verified_page_path: String,
    /// Delay before the verified page moves on by itself.
    pub auto_redirect_delay_ms: u64,
    /// Whether the fallback navigation mechanism may be used.
    pub fallback_enabled: bool,
}

impl Default for RedirectionConfig {
    fn default() -> Self {
        Self {
            base_url: DEVELOPMENT_BASE_URL.to_string(),
            verified_page_path: "/auth/verified".to_string(),
            auto_redirect_delay_ms: 3_000,
            fallback_enabled: true,
        }
    }
}

/// Bounds applied to a single post-login redirect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
#[serde(default, rename_all = "camelCase")]
pub struct RedirectOptions {
    /// Upper bound for one attempt (primary plus fallback).
    pub timeout_ms: u64,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Destination used by the fallback mechanism when the resolved target cannot be reached.
    pub fallback_path: String,
    /// Delay between issuing a navigation and checking that it took effect.
    pub verification_delay_ms: u64,
    /// Delay between two attempts.
    pub retry_delay_ms: u64,
}

impl Default for RedirectOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_retries: 3,
            fallback_path: "/".to_string(),
            verification_delay_ms: 100,
            retry_delay_ms: 500,
        }
    }
}

/// Thresholds for the session health manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
#[serde(default, rename_all = "camelCase")]
pub struct HealthConfig {
    /// Recovery attempts after which re-authentication is forced.
    pub max_retry_attempts: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
        }
    }
}

/// Every option recognized by the core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, uniffi::Record)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthSyncConfig {
    /// Cross-context watcher settings.
    pub polling: PollingConfig,
    /// Return URL and verified page settings.
    pub redirection: RedirectionConfig,
    /// Post-login redirect bounds.
    pub redirect: RedirectOptions,
    /// Recovery policy thresholds.
    pub health: HealthConfig,
}

impl AuthSyncConfig {
    /// Builds the defaults for `environment`.
    ///
    /// Staging and production have no implicit origin; development falls back to
    /// [`DEVELOPMENT_BASE_URL`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthSyncError::Environment`] if no usable base URL is available for a deployed
    /// environment.
    pub fn from_environment(
        environment: Environment,
        base_url: Option<String>,
    ) -> Result<Self, AuthSyncError> {
        let base_url = match (environment, base_url) {
            (_, Some(url)) if !url.trim().is_empty() => url,
            (Environment::Development, _) => DEVELOPMENT_BASE_URL.to_string(),
            (env, _) => {
                return Err(AuthSyncError::Environment(format!(
                    "a base url is required in {env}"
                )))
            }
        };

        let mut config = Self::default();
        config.redirection.base_url = base_url;
        match environment {
            Environment::Development => {
                config.redirect.timeout_ms = 10_000;
            }
            Environment::Staging => {}
            Environment::Production => {
                config.polling.interval_ms = 2_000;
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Parses a host supplied JSON document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`AuthSyncError::Configuration`] for malformed JSON or invalid values.
    pub fn from_json(json: &str) -> Result<Self, AuthSyncError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| AuthSyncError::Configuration(format!("invalid config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would make the timers spin or never fire.
    ///
    /// # Errors
    ///
    /// Returns [`AuthSyncError::Configuration`] naming the first invalid field.
    pub fn validate(&self) -> Result<(), AuthSyncError> {
        self.polling.validate()?;
        if self.redirect.timeout_ms == 0 {
            return Err(invalid("redirect.timeoutMs", "must be greater than zero"));
        }
        if !self.redirect.fallback_path.starts_with('/') {
            return Err(invalid("redirect.fallbackPath", "must be an absolute path"));
        }
        if !self.redirection.verified_page_path.starts_with('/') {
            return Err(invalid(
                "redirection.verifiedPagePath",
                "must be an absolute path",
            ));
        }
        url::Url::parse(&self.redirection.base_url)
            .map_err(|err| invalid("redirection.baseUrl", &err.to_string()))?;
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> AuthSyncError {
    AuthSyncError::Configuration(format!("{field} {reason}"))
}

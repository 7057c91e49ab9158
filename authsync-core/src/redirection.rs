//! Return URL encoding for authentication flows finishing in a detached context.
//!
//! The detached context (popup, external browser tab, installed-app window) cannot call back into
//! the origin context directly. It encodes the outcome into a return URL on the fixed callback
//! path; the callback page in the origin context decodes it and reconciles the auth state.

use std::sync::Arc;

use url::Url;

use crate::auth_state::{AuthSource, AuthState};
use crate::config::RedirectionConfig;
use crate::error::AuthSyncError;
use crate::navigation::{NavigationMechanism, Navigator};
use crate::storage::{KeyValueStorage, PersistentStateStore, PENDING_RETURN_URL_KEY};
use crate::utils::now_ms;

/// Path of the callback page, relative to the application origin.
pub const CALLBACK_PATH: &str = "/auth/callback";

/// Marks a return URL as produced by a detached context.
const SOURCE_EXTERNAL_APP: &str = "external_app";

/// Used to resolve relative return URLs (`/auth/callback?...` or `?...`).
const PLACEHOLDER_ORIGIN: &str = "http://localhost";

/// Outcome of an authentication flow as carried by a return URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, uniffi::Record)]
pub struct AuthResult {
    /// Whether the user is signed in.
    pub success: bool,
    /// Identifier of the signed in user.
    pub user_id: Option<String>,
    /// Opaque session token, if the provider issued one.
    pub session_token: Option<String>,
    /// Provider or decoder error; only meaningful when `success` is false.
    pub error: Option<String>,
}

impl AuthResult {
    /// A successful outcome for `user_id`.
    #[must_use]
    pub const fn succeeded(user_id: String, session_token: Option<String>) -> Self {
        Self {
            success: true,
            user_id: Some(user_id),
            session_token,
            error: None,
        }
    }

    /// A failed outcome carrying `error`.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

fn join_path(base_url: &str, path: &str) -> Result<Url, AuthSyncError> {
    let mut url = Url::parse(base_url).map_err(|err| {
        AuthSyncError::Configuration(format!("invalid base url {base_url}: {err}"))
    })?;
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|()| {
            AuthSyncError::Configuration(format!("base url {base_url} cannot carry a path"))
        })?
        .pop_if_empty()
        .extend(path.split('/').filter(|segment| !segment.is_empty()));
    Ok(url)
}

/// Encodes `result` into a return URL on [`CALLBACK_PATH`] under `base_url`.
///
/// `session_token` is omitted when absent and `error` is only written for failures.
///
/// # Errors
///
/// Returns [`AuthSyncError::Configuration`] if `base_url` is not an absolute URL.
#[uniffi::export]
#[allow(clippy::needless_pass_by_value)]
pub fn build_return_url(base_url: &str, result: AuthResult) -> Result<String, AuthSyncError> {
    encode_return_url(base_url, &result)
}

fn encode_return_url(base_url: &str, result: &AuthResult) -> Result<String, AuthSyncError> {
    let mut url = join_path(base_url, CALLBACK_PATH)?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("success", if result.success { "true" } else { "false" });
        if let Some(user_id) = &result.user_id {
            query.append_pair("user_id", user_id);
        }
        if let Some(token) = &result.session_token {
            query.append_pair("session_token", token);
        }
        if !result.success {
            if let Some(error) = &result.error {
                query.append_pair("error", error);
            }
        }
        query.append_pair("source", SOURCE_EXTERNAL_APP);
    }
    Ok(url.into())
}

/// Decodes a return URL produced by [`build_return_url`].
///
/// Never fails: a malformed URL or missing parameters decode to a failed [`AuthResult`] whose
/// `error` explains what was wrong. A missing `success` parameter reads as `false`, and a
/// success without a user id is downgraded to a failure.
#[uniffi::export]
pub fn parse_return_url(url: &str) -> AuthResult {
    let parsed = Url::parse(url).or_else(|_| {
        Url::parse(PLACEHOLDER_ORIGIN).and_then(|origin| origin.join(url.trim()))
    });
    let parsed = match parsed {
        Ok(parsed) => parsed,
        Err(err) => {
            log::warn!("malformed return url: {err}");
            return AuthResult::failed(format!("malformed return url: {err}"));
        }
    };

    let mut success = None;
    let mut result = AuthResult::default();
    for (key, value) in parsed.query_pairs() {
        let value = value.into_owned();
        match key.as_ref() {
            "success" => success = Some(value == "true"),
            "user_id" if !value.is_empty() => result.user_id = Some(value),
            "session_token" if !value.is_empty() => result.session_token = Some(value),
            "error" if !value.is_empty() => result.error = Some(value),
            _ => {}
        }
    }

    match success {
        None => {
            result.error.get_or_insert_with(|| "missing success parameter".to_string());
        }
        Some(true) if result.user_id.is_none() => {
            result.error = Some("missing user_id for successful authentication".to_string());
        }
        Some(true) => {
            result.success = true;
            result.error = None;
        }
        Some(false) => {}
    }
    result
}

/// Builds and reads return URLs for one application origin and starts provider flows.
#[derive(uniffi::Object)]
pub struct RedirectionCodec {
    config: RedirectionConfig,
    storage: PersistentStateStore,
    navigator: Arc<dyn Navigator>,
}

#[uniffi::export]
impl RedirectionCodec {
    /// Creates a codec for `config.base_url`.
    #[uniffi::constructor]
    #[must_use]
    pub fn new(
        storage: Arc<dyn KeyValueStorage>,
        navigator: Arc<dyn Navigator>,
        config: RedirectionConfig,
    ) -> Self {
        Self::with_store(PersistentStateStore::new(storage), navigator, config)
    }

    /// Absolute URL of the callback page.
    ///
    /// # Errors
    ///
    /// Returns [`AuthSyncError::Configuration`] if the configured base URL is not absolute.
    pub fn callback_url(&self) -> Result<String, AuthSyncError> {
        join_path(&self.config.base_url, CALLBACK_PATH).map(Into::into)
    }

    /// [`build_return_url`] under the configured base URL.
    ///
    /// # Errors
    ///
    /// Returns [`AuthSyncError::Configuration`] if the configured base URL is not absolute.
    #[allow(clippy::needless_pass_by_value)]
    pub fn return_url(&self, result: AuthResult) -> Result<String, AuthSyncError> {
        encode_return_url(&self.config.base_url, &result)
    }

    /// Starts the `provider` flow.
    ///
    /// `return_url` (the callback URL when unset) is saved under the pending return key so the
    /// callback page can find its way back, then the context navigates to
    /// `{base_url}/auth/{provider}`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthSyncError::Navigation`] naming `provider` if the navigation failed, and
    /// [`AuthSyncError::Configuration`] for an unusable base URL or provider.
    pub fn redirect_to_auth(
        &self,
        provider: String,
        return_url: Option<String>,
    ) -> Result<(), AuthSyncError> {
        let provider = provider.trim();
        if provider.is_empty() {
            return Err(AuthSyncError::Configuration(
                "provider must not be empty".to_string(),
            ));
        }
        let return_url = match return_url {
            Some(url) => url,
            None => self.callback_url()?,
        };
        if !self.storage.write(PENDING_RETURN_URL_KEY, &return_url) {
            log::warn!("pending return url not saved; the callback page will use the default");
        }

        let mut target = join_path(&self.config.base_url, "/auth")?;
        target
            .path_segments_mut()
            .map_err(|()| AuthSyncError::Configuration("base url cannot carry a path".to_string()))?
            .push(provider);
        log::info!("redirecting to {provider} sign in");
        self.navigator
            .navigate(target.into(), NavigationMechanism::Primary)
            .map_err(|err| {
                let err = AuthSyncError::Navigation {
                    provider: provider.to_string(),
                    reason: err.to_string(),
                };
                log::error!("{err}");
                err
            })
    }

    /// Returns and forgets the return URL saved by [`Self::redirect_to_auth`].
    pub fn take_pending_return_url(&self) -> Option<String> {
        let url = self.storage.read(PENDING_RETURN_URL_KEY)?;
        self.storage.clear(PENDING_RETURN_URL_KEY);
        Some(url)
    }

    /// Absolute URL of the page shown after an email verification.
    ///
    /// # Errors
    ///
    /// Returns [`AuthSyncError::Configuration`] if the configured base URL is not absolute.
    pub fn verified_page_url(&self) -> Result<String, AuthSyncError> {
        join_path(&self.config.base_url, &self.config.verified_page_path).map(Into::into)
    }

    /// Delay before the verified page moves on by itself.
    #[must_use]
    pub const fn auto_redirect_delay_ms(&self) -> u64 {
        self.config.auto_redirect_delay_ms
    }

    /// Converts a decoded outcome into the state the detached context reports.
    #[must_use]
    #[allow(clippy::needless_pass_by_value)]
    pub fn to_auth_state(&self, result: AuthResult) -> AuthState {
        self.to_auth_state_at(&result, now_ms())
    }
}

impl RedirectionCodec {
    /// Creates a codec over an existing [`PersistentStateStore`].
    #[must_use]
    pub fn with_store(
        storage: PersistentStateStore,
        navigator: Arc<dyn Navigator>,
        config: RedirectionConfig,
    ) -> Self {
        Self {
            config,
            storage,
            navigator,
        }
    }

    /// [`Self::to_auth_state`] stamped with `now`.
    #[must_use]
    pub fn to_auth_state_at(&self, result: &AuthResult, now: u64) -> AuthState {
        match (&result.user_id, result.success) {
            (Some(user_id), true) => AuthState::authenticated(
                user_id.clone(),
                result.session_token.clone(),
                AuthSource::External,
                now,
            ),
            _ => AuthState::unauthenticated(AuthSource::External, now),
        }
    }
}

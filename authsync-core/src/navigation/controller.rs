//! Executing the post-login redirect: verified navigation, fallback, timeout and retries.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::AbortHandle;

use super::paths::{get_redirect_path, LOGIN_PATH};
use super::{NavigationMechanism, NavigationState, Navigator, RedirectReason, UserProfile};
use crate::config::RedirectOptions;
use crate::error::AuthSyncError;
use crate::session_health::{
    RecoveryAction, RecoveryRecommendation, SessionPersistenceStateManager, SyncErrorKind,
};
use crate::utils::{duration_to_ms, now_ms};

/// Observer for redirect retries, e.g. to show a "still redirecting" hint.
#[uniffi::export(with_foreign)]
pub trait RedirectListener: Send + Sync {
    /// Called before each retry with the number of the attempt that failed.
    fn on_retry(&self, attempt: u32, error: String);
}

/// Input of [`NavigationController::handle_post_login_redirect`]. Unset bounds fall back to the
/// controller's [`RedirectOptions`].
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct RedirectRequest {
    /// Profile of the user that just signed in.
    pub profile: UserProfile,
    /// Path the user was on before authentication started.
    pub previous_path: Option<String>,
    /// Destination for the fallback mechanism.
    pub fallback_path: Option<String>,
    /// Upper bound for one attempt.
    pub timeout_ms: Option<u64>,
    /// Retries after the first attempt.
    pub max_retries: Option<u32>,
}

impl RedirectRequest {
    /// A request using every default.
    #[must_use]
    pub const fn new(profile: UserProfile, previous_path: Option<String>) -> Self {
        Self {
            profile,
            previous_path,
            fallback_path: None,
            timeout_ms: None,
            max_retries: None,
        }
    }
}

/// How [`NavigationController::handle_post_login_redirect`] resolved.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Enum)]
pub enum RedirectOutcome {
    /// The navigation was verified.
    Redirected {
        /// Where the user landed.
        path: String,
        /// Attempts used, including the successful one.
        attempts: u32,
        /// Whether the fallback mechanism got the user there.
        used_fallback: bool,
    },
    /// The first attempt failed and the next one runs on a timer owned by the controller.
    RetryScheduled {
        /// Attempts made so far.
        attempts: u32,
        /// Failure of the last attempt.
        last_error: String,
        /// Delay before the next attempt.
        retry_in_ms: u64,
    },
    /// Every attempt failed; the user stays on the current page.
    GaveUp {
        /// Failure of the last attempt.
        last_error: String,
        /// Attempts made.
        attempts: u32,
    },
    /// The session health record demanded re-authentication and the user was sent to the login
    /// page instead.
    LoginRequired {
        /// The recommendation that stopped the retries.
        recommendation: RecoveryRecommendation,
    },
    /// The attempt was cancelled by [`NavigationController::handle_auth_timeout`] or
    /// [`NavigationController::destroy`].
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error("redirect attempt timed out after {0} ms")]
    TimedOut(u64),
    #[error("navigation to {0} could not be verified")]
    Unverified(String),
}

struct Landing {
    path: String,
    used_fallback: bool,
}

/// One redirect cycle: where to go and how many more tries it gets.
struct RedirectCycle {
    target: String,
    fallback_path: String,
    timeout: Duration,
    delays: ExponentialBackoff,
}

enum NextStep {
    Retry(Duration),
    GiveUp,
    Reauth(RecoveryRecommendation),
}

/// State shared between the controller handle and its timers.
struct RedirectCore {
    navigator: Arc<dyn Navigator>,
    options: RedirectOptions,
    fallback_enabled: bool,
    health: Option<Arc<SessionPersistenceStateManager>>,
    state: Mutex<NavigationState>,
    timers: Mutex<Vec<AbortHandle>>,
    /// Timer driving the retries of the current cycle.
    retry: Mutex<Option<AbortHandle>>,
    cancel: watch::Sender<u64>,
    listener: Mutex<Option<Arc<dyn RedirectListener>>>,
}

/// Decides the post-authentication destination and gets the user there.
///
/// Each attempt issues a primary navigation, verifies it after a short delay and falls back to
/// the alternate mechanism when verification fails. An attempt is raced against a timeout, so a
/// call resolves within one timeout. Failed attempts are retried with backoff on a timer owned by
/// the controller, a bounded number of times. Every timer is cancelled by
/// [`Self::handle_auth_timeout`] and [`Self::destroy`].
///
/// When built with a session health manager, each failed attempt is recorded there and a
/// `reauth` recommendation stops the retries and sends the user to the login page.
#[derive(uniffi::Object)]
pub struct NavigationController {
    core: Arc<RedirectCore>,
}

#[uniffi::export(async_runtime = "tokio")]
impl NavigationController {
    /// Creates a controller driving `navigator`.
    #[uniffi::constructor]
    #[must_use]
    pub fn new(
        navigator: Arc<dyn Navigator>,
        options: RedirectOptions,
        fallback_enabled: bool,
    ) -> Self {
        Self::build(navigator, options, fallback_enabled, None)
    }

    /// Resolves the destination for `profile`; see [`get_redirect_path`].
    #[must_use]
    #[allow(clippy::needless_pass_by_value)]
    pub fn resolve_redirect_path(
        &self,
        profile: UserProfile,
        previous_path: Option<String>,
    ) -> String {
        get_redirect_path(&profile, previous_path.as_deref())
    }

    /// Sends the freshly signed in user to their destination.
    ///
    /// Makes one attempt and resolves within its timeout. If it fails and retries remain, the
    /// next attempt is scheduled and [`RedirectOutcome::RetryScheduled`] is returned; progress
    /// is then visible through [`Self::navigation_state`]. Starting a new cycle cancels the
    /// retries of the previous one.
    pub async fn handle_post_login_redirect(&self, request: RedirectRequest) -> RedirectOutcome {
        let core = &self.core;
        let mut cycle = core.begin(request);
        let mut cancelled = core.cancel.subscribe();
        let result = tokio::select! {
            result = core.attempt(&cycle) => result,
            _ = cancelled.changed() => {
                log::info!("post-login redirect cancelled");
                return RedirectOutcome::Cancelled;
            }
        };

        let err = match result {
            Ok(landing) => return core.finish(landing),
            Err(err) => err,
        };
        let last_error = err.to_string();
        match core.after_failure(&err, &mut cycle) {
            NextStep::Retry(delay) => match RedirectCore::schedule_retry(core, cycle, delay) {
                Ok(()) => RedirectOutcome::RetryScheduled {
                    attempts: core.attempts(),
                    last_error,
                    retry_in_ms: duration_to_ms(delay),
                },
                Err(err) => {
                    log::warn!("{err}");
                    core.give_up(last_error)
                }
            },
            NextStep::GiveUp => core.give_up(last_error),
            NextStep::Reauth(recommendation) => core.reauth(recommendation),
        }
    }

    /// Escape hatch when the flow cannot make progress: cancels every pending timer and
    /// hard-redirects to the login page with a timeout marker.
    ///
    /// # Errors
    ///
    /// Returns [`AuthSyncError::Navigation`] if the platform refused the navigation.
    pub fn handle_auth_timeout(&self) -> Result<(), AuthSyncError> {
        self.core.force_login(RedirectReason::Timeout)
    }

    /// Cancels pending work like [`Self::handle_auth_timeout`], then redirects to the login page
    /// for `reason`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthSyncError::Navigation`] if the platform refused the navigation.
    pub fn force_login(&self, reason: RedirectReason) -> Result<(), AuthSyncError> {
        self.core.force_login(reason)
    }

    /// Hard-redirects to the login page. A `timeout` reason appends `?timeout=true`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthSyncError::Navigation`] if the platform refused the navigation.
    pub fn redirect_to_login(&self, reason: RedirectReason) -> Result<(), AuthSyncError> {
        self.core.redirect_to_login(reason)
    }

    /// Navigates to `path` after `delay_ms`, unless cancelled first.
    ///
    /// # Errors
    ///
    /// Returns [`AuthSyncError::Environment`] when called outside a tokio runtime.
    pub fn schedule_redirect(&self, path: String, delay_ms: u64) -> Result<(), AuthSyncError> {
        let runtime = runtime("scheduling")?;
        let navigator = Arc::clone(&self.core.navigator);
        let task = runtime.spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            if let Err(err) = navigator.navigate(path.clone(), NavigationMechanism::Primary) {
                log::warn!("scheduled redirect to {path} failed: {err}");
            }
        });
        let mut timers = self.core.lock_timers();
        timers.retain(|timer| !timer.is_finished());
        timers.push(task.abort_handle());
        Ok(())
    }

    /// Number of scheduled redirects and retries that have not fired yet.
    #[must_use]
    pub fn pending_timers(&self) -> u32 {
        let scheduled = {
            let mut timers = self.core.lock_timers();
            timers.retain(|timer| !timer.is_finished());
            timers.len()
        };
        let retrying = self
            .core
            .lock_retry()
            .as_ref()
            .is_some_and(|retry| !retry.is_finished());
        u32::try_from(scheduled + usize::from(retrying)).unwrap_or(u32::MAX)
    }

    /// Snapshot of the redirect cycle in progress.
    #[must_use]
    pub fn navigation_state(&self) -> NavigationState {
        self.core.navigation_state()
    }

    /// Registers the retry observer, replacing any previous one.
    pub fn set_redirect_listener(&self, listener: Arc<dyn RedirectListener>) {
        *self
            .core
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    /// Closes the current context through the navigator.
    pub fn close_context(&self) {
        self.core.navigator.close();
    }

    /// Cancels every pending timer and in-flight redirect attempt.
    pub fn destroy(&self) {
        self.core.cancel_pending();
        self.core
            .update_state(|state| *state = NavigationState::default());
    }
}

impl NavigationController {
    /// Creates a controller that reports failed attempts to `health` and follows its
    /// recommendation.
    #[must_use]
    pub fn with_health(
        navigator: Arc<dyn Navigator>,
        options: RedirectOptions,
        fallback_enabled: bool,
        health: Arc<SessionPersistenceStateManager>,
    ) -> Self {
        Self::build(navigator, options, fallback_enabled, Some(health))
    }

    fn build(
        navigator: Arc<dyn Navigator>,
        options: RedirectOptions,
        fallback_enabled: bool,
        health: Option<Arc<SessionPersistenceStateManager>>,
    ) -> Self {
        let (cancel, _) = watch::channel(0);
        Self {
            core: Arc::new(RedirectCore {
                navigator,
                options,
                fallback_enabled,
                health,
                state: Mutex::new(NavigationState::default()),
                timers: Mutex::new(Vec::new()),
                retry: Mutex::new(None),
                cancel,
                listener: Mutex::new(None),
            }),
        }
    }
}

impl Drop for NavigationController {
    fn drop(&mut self) {
        self.core.cancel_pending();
    }
}

impl RedirectCore {
    fn navigation_state(&self) -> NavigationState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn attempts(&self) -> u32 {
        self.navigation_state().attempt
    }

    fn update_state(&self, update: impl FnOnce(&mut NavigationState)) {
        update(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner));
    }

    fn lock_timers(&self) -> MutexGuard<'_, Vec<AbortHandle>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_retry(&self) -> MutexGuard<'_, Option<AbortHandle>> {
        self.retry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel_pending(&self) {
        self.cancel
            .send_modify(|generation| *generation = generation.wrapping_add(1));
        let timers: Vec<AbortHandle> = self.lock_timers().drain(..).collect();
        for timer in timers {
            timer.abort();
        }
        if let Some(retry) = self.lock_retry().take() {
            retry.abort();
        }
    }

    fn force_login(&self, reason: RedirectReason) -> Result<(), AuthSyncError> {
        self.cancel_pending();
        self.redirect_to_login(reason)
    }

    fn redirect_to_login(&self, reason: RedirectReason) -> Result<(), AuthSyncError> {
        let target = if reason == RedirectReason::Timeout {
            format!("{LOGIN_PATH}?timeout=true")
        } else {
            LOGIN_PATH.to_string()
        };
        log::warn!("redirecting to {target} ({reason})");
        self.update_state(|state| {
            *state = NavigationState {
                is_redirecting: true,
                redirect_path: Some(target.clone()),
                redirect_reason: Some(reason),
                timestamp: now_ms(),
                attempt: 1,
                last_error: None,
            };
        });
        let result = self
            .navigator
            .navigate(target.clone(), NavigationMechanism::Primary)
            .map_err(|err| navigation_error(&target, &err));
        match &result {
            Ok(()) => self.update_state(|state| *state = NavigationState::default()),
            Err(err) => {
                log::error!("{err}");
                self.update_state(|state| {
                    state.is_redirecting = false;
                    state.last_error = Some(err.to_string());
                });
            }
        }
        result
    }

    /// Starts a new cycle, dropping the retries of the previous one.
    fn begin(&self, request: RedirectRequest) -> RedirectCycle {
        if let Some(previous) = self.lock_retry().take() {
            previous.abort();
        }
        let target = get_redirect_path(&request.profile, request.previous_path.as_deref());
        let retry_delay = Duration::from_millis(self.options.retry_delay_ms);
        let max_retries = request.max_retries.unwrap_or(self.options.max_retries);
        let delays = ExponentialBuilder::default()
            .with_min_delay(retry_delay)
            .with_max_delay(retry_delay.saturating_mul(4))
            .with_max_times(max_retries as usize)
            .build();

        self.update_state(|state| {
            *state = NavigationState {
                is_redirecting: true,
                redirect_path: Some(target.clone()),
                redirect_reason: Some(RedirectReason::Login),
                timestamp: now_ms(),
                attempt: 0,
                last_error: None,
            };
        });

        RedirectCycle {
            target,
            fallback_path: request
                .fallback_path
                .unwrap_or_else(|| self.options.fallback_path.clone()),
            timeout: Duration::from_millis(request.timeout_ms.unwrap_or(self.options.timeout_ms)),
            delays,
        }
    }

    async fn attempt(&self, cycle: &RedirectCycle) -> Result<Landing, AttemptError> {
        let mut attempt = 0;
        self.update_state(|state| {
            state.attempt += 1;
            state.timestamp = now_ms();
            attempt = state.attempt;
        });
        log::debug!("redirect attempt {attempt} to {}", cycle.target);

        tokio::time::timeout(
            cycle.timeout,
            self.navigate_verified(&cycle.target, &cycle.fallback_path),
        )
        .await
        .unwrap_or_else(|_| Err(AttemptError::TimedOut(duration_to_ms(cycle.timeout))))
    }

    async fn navigate_verified(
        &self,
        target: &str,
        fallback_path: &str,
    ) -> Result<Landing, AttemptError> {
        if self.try_navigate(target, NavigationMechanism::Primary).await {
            return Ok(Landing {
                path: target.to_string(),
                used_fallback: false,
            });
        }
        if self.fallback_enabled {
            for path in [target, fallback_path] {
                if self.try_navigate(path, NavigationMechanism::Fallback).await {
                    return Ok(Landing {
                        path: path.to_string(),
                        used_fallback: true,
                    });
                }
                if fallback_path == target {
                    break;
                }
            }
        }
        Err(AttemptError::Unverified(target.to_string()))
    }

    async fn try_navigate(&self, path: &str, mechanism: NavigationMechanism) -> bool {
        if let Err(err) = self.navigator.navigate(path.to_string(), mechanism) {
            log::warn!("{mechanism} navigation to {path} failed: {err}");
            return false;
        }
        tokio::time::sleep(Duration::from_millis(self.options.verification_delay_ms)).await;
        self.navigator.verify_navigated(path.to_string())
    }

    /// Records a failed attempt and decides what happens next. Fires the retry callback when
    /// another attempt follows.
    fn after_failure(&self, err: &AttemptError, cycle: &mut RedirectCycle) -> NextStep {
        let error = err.to_string();
        let mut attempt = 0;
        self.update_state(|state| {
            state.last_error = Some(error.clone());
            attempt = state.attempt;
        });
        let next = cycle.delays.next();

        if let Some(health) = &self.health {
            health.add_sync_error(SyncErrorKind::Navigation, error.clone(), next.is_some());
            health.record_recovery_attempt();
            let recommendation = health.get_recovery_recommendation();
            if recommendation.action == RecoveryAction::Reauth {
                return NextStep::Reauth(recommendation);
            }
        }

        let Some(delay) = next else {
            return NextStep::GiveUp;
        };
        log::warn!(
            "redirect attempt {attempt} failed: {error}; retrying in {} ms",
            duration_to_ms(delay)
        );
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(listener) = listener {
            listener.on_retry(attempt, error);
        }
        NextStep::Retry(delay)
    }

    /// Runs the remaining attempts of `cycle` on a timer, starting after `delay`.
    fn schedule_retry(
        core: &Arc<Self>,
        mut cycle: RedirectCycle,
        mut delay: Duration,
    ) -> Result<(), AuthSyncError> {
        let runtime = runtime("retrying a redirect")?;
        let task = runtime.spawn({
            let core = Arc::clone(core);
            async move {
                loop {
                    tokio::time::sleep(delay).await;
                    let err = match core.attempt(&cycle).await {
                        Ok(landing) => {
                            core.finish(landing);
                            return;
                        }
                        Err(err) => err,
                    };
                    match core.after_failure(&err, &mut cycle) {
                        NextStep::Retry(next) => delay = next,
                        NextStep::GiveUp => {
                            core.give_up(err.to_string());
                            return;
                        }
                        NextStep::Reauth(recommendation) => {
                            core.reauth(recommendation);
                            return;
                        }
                    }
                }
            }
        });
        *core.lock_retry() = Some(task.abort_handle());
        Ok(())
    }

    fn finish(&self, landing: Landing) -> RedirectOutcome {
        let attempts = self.attempts();
        log::info!("redirected to {} after {attempts} attempt(s)", landing.path);
        self.update_state(|state| *state = NavigationState::default());
        RedirectOutcome::Redirected {
            path: landing.path,
            attempts,
            used_fallback: landing.used_fallback,
        }
    }

    fn give_up(&self, last_error: String) -> RedirectOutcome {
        let mut attempts = 0;
        let mut target = String::new();
        self.update_state(|state| {
            state.is_redirecting = false;
            state.last_error = Some(last_error.clone());
            attempts = state.attempt;
            target = state.redirect_path.clone().unwrap_or_default();
        });
        log::error!("giving up redirect to {target} after {attempts} attempt(s): {last_error}");
        RedirectOutcome::GaveUp {
            last_error,
            attempts,
        }
    }

    fn reauth(&self, recommendation: RecoveryRecommendation) -> RedirectOutcome {
        log::warn!(
            "abandoning redirect, re-authentication required: {}",
            recommendation.reason
        );
        if let Err(err) = self.force_login(RedirectReason::Error) {
            log::error!("login redirect after failed redirect cycle failed: {err}");
        }
        RedirectOutcome::LoginRequired { recommendation }
    }
}

fn runtime(purpose: &str) -> Result<Handle, AuthSyncError> {
    Handle::try_current().map_err(|err| {
        AuthSyncError::Environment(format!("{purpose} requires a tokio runtime: {err}"))
    })
}

fn navigation_error(target: &str, err: &AuthSyncError) -> AuthSyncError {
    let reason = match err {
        AuthSyncError::Navigation { reason, .. } => reason.clone(),
        other => other.to_string(),
    };
    AuthSyncError::Navigation {
        provider: target.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::time::Instant;

    use super::*;
    use crate::config::HealthConfig;
    use crate::navigation::UserRole;
    use crate::storage::MemoryStorage;

    /// Navigator whose location follows navigations only through the enabled mechanisms.
    #[derive(Default)]
    struct FakeNavigator {
        location: Mutex<String>,
        primary_works: bool,
        fallback_works: bool,
        refuse: bool,
        calls: Mutex<Vec<(String, NavigationMechanism)>>,
        closed: AtomicU32,
    }

    impl FakeNavigator {
        fn working() -> Self {
            Self {
                primary_works: true,
                fallback_works: true,
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<(String, NavigationMechanism)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Navigator for FakeNavigator {
        fn navigate(
            &self,
            path: String,
            mechanism: NavigationMechanism,
        ) -> Result<(), AuthSyncError> {
            self.calls.lock().unwrap().push((path.clone(), mechanism));
            if self.refuse {
                return Err(AuthSyncError::Unknown("blocked".to_string()));
            }
            let works = match mechanism {
                NavigationMechanism::Primary => self.primary_works,
                NavigationMechanism::Fallback => self.fallback_works,
            };
            if works {
                *self.location.lock().unwrap() = path;
            }
            Ok(())
        }

        fn verify_navigated(&self, path: String) -> bool {
            *self.location.lock().unwrap() == path
        }

        fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RetryRecorder(Mutex<Vec<u32>>);

    impl RedirectListener for RetryRecorder {
        fn on_retry(&self, attempt: u32, _error: String) {
            self.0.lock().unwrap().push(attempt);
        }
    }

    fn options() -> RedirectOptions {
        RedirectOptions {
            timeout_ms: 1_000,
            max_retries: 2,
            fallback_path: "/".to_string(),
            verification_delay_ms: 100,
            retry_delay_ms: 200,
        }
    }

    fn request(role: UserRole, previous: Option<&str>) -> RedirectRequest {
        RedirectRequest::new(UserProfile::with_role(role), previous.map(str::to_string))
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_redirect_succeeds() {
        let navigator = Arc::new(FakeNavigator::working());
        let controller = NavigationController::new(navigator.clone(), options(), true);

        let outcome = controller
            .handle_post_login_redirect(request(UserRole::User, Some("/rooms/4")))
            .await;
        assert_eq!(
            outcome,
            RedirectOutcome::Redirected {
                path: "/rooms/4".to_string(),
                attempts: 1,
                used_fallback: false,
            }
        );
        assert_eq!(controller.navigation_state(), NavigationState::default());
        assert_eq!(navigator.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_used_when_primary_unverified() {
        let navigator = Arc::new(FakeNavigator {
            fallback_works: true,
            ..FakeNavigator::default()
        });
        let controller = NavigationController::new(navigator.clone(), options(), true);

        let outcome = controller
            .handle_post_login_redirect(request(UserRole::Admin, Some("/login")))
            .await;
        assert_eq!(
            outcome,
            RedirectOutcome::Redirected {
                path: "/admin".to_string(),
                attempts: 1,
                used_fallback: true,
            }
        );
        assert_eq!(
            navigator.calls(),
            vec![
                ("/admin".to_string(), NavigationMechanism::Primary),
                ("/admin".to_string(), NavigationMechanism::Fallback),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_run_on_timer_until_given_up() {
        let navigator = Arc::new(FakeNavigator::default());
        let controller = NavigationController::new(navigator.clone(), options(), false);
        let retries = Arc::new(RetryRecorder::default());
        controller.set_redirect_listener(retries.clone());

        let outcome = controller
            .handle_post_login_redirect(request(UserRole::User, None))
            .await;
        match outcome {
            RedirectOutcome::RetryScheduled {
                attempts,
                last_error,
                retry_in_ms,
            } => {
                assert_eq!(attempts, 1);
                assert_eq!(retry_in_ms, 200);
                assert!(last_error.contains("could not be verified"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(controller.pending_timers(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        let state = controller.navigation_state();
        assert_eq!(state.attempt, 3);
        assert!(!state.is_redirecting);
        assert!(state
            .last_error
            .is_some_and(|error| error.contains("could not be verified")));
        assert_eq!(retries.0.lock().unwrap().as_slice(), &[1, 2]);
        assert_eq!(controller.pending_timers(), 0);
        assert_eq!(navigator.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_at_once_without_retries() {
        let navigator = Arc::new(FakeNavigator::default());
        let controller = NavigationController::new(navigator, options(), false);
        let mut request = request(UserRole::User, None);
        request.max_retries = Some(0);

        let outcome = controller.handle_post_login_redirect(request).await;
        assert!(matches!(outcome, RedirectOutcome::GaveUp { attempts: 1, .. }));
        assert!(controller.navigation_state().last_error.is_some());
        assert_eq!(controller.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_bounds_call_with_default_retries() {
        let navigator = Arc::new(FakeNavigator::default());
        let slow = RedirectOptions {
            verification_delay_ms: 60_000,
            ..RedirectOptions::default()
        };
        let controller = NavigationController::new(navigator, slow, true);
        let mut request = request(UserRole::User, None);
        request.timeout_ms = Some(1_000);

        let started = Instant::now();
        let outcome = controller.handle_post_login_redirect(request).await;
        let elapsed = started.elapsed();
        assert!(matches!(
            outcome,
            RedirectOutcome::RetryScheduled { attempts: 1, ref last_error, .. }
                if last_error.contains("timed out")
        ));
        assert!(elapsed >= Duration::from_millis(1_000));
        assert!(elapsed < Duration::from_millis(1_050), "took {elapsed:?}");

        // four attempts of 1s plus 500ms, 1s and 2s of backoff
        tokio::time::sleep(Duration::from_secs(10)).await;
        let state = controller.navigation_state();
        assert_eq!(state.attempt, 4);
        assert!(!state.is_redirecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_lands_on_later_attempt() {
        let navigator = Arc::new(FakeNavigator::default());
        let controller = NavigationController::new(navigator.clone(), options(), false);

        let outcome = controller
            .handle_post_login_redirect(request(UserRole::User, Some("/rooms/2")))
            .await;
        assert!(matches!(outcome, RedirectOutcome::RetryScheduled { .. }));
        *navigator.location.lock().unwrap() = "/rooms/2".to_string();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(controller.navigation_state(), NavigationState::default());
        assert_eq!(navigator.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_attempts_feed_health_record_until_reauth() {
        let navigator = Arc::new(FakeNavigator::default());
        let health = Arc::new(SessionPersistenceStateManager::new(
            Arc::new(MemoryStorage::new()),
            HealthConfig::default(),
        ));
        let mut patient = options();
        patient.max_retries = 10;
        let controller =
            NavigationController::with_health(navigator.clone(), patient, false, health.clone());

        let outcome = controller
            .handle_post_login_redirect(request(UserRole::User, Some("/rooms/1")))
            .await;
        assert!(matches!(outcome, RedirectOutcome::RetryScheduled { .. }));
        assert_eq!(health.snapshot().recovery_attempts, 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        let record = health.snapshot();
        assert_eq!(record.recovery_attempts, 3);
        assert!(record
            .sync_errors
            .iter()
            .all(|error| error.kind == SyncErrorKind::Navigation));
        assert_eq!(
            navigator.calls().last(),
            Some(&("/login".to_string(), NavigationMechanism::Primary))
        );
        let target_attempts = navigator
            .calls()
            .iter()
            .filter(|(path, _)| path == "/rooms/1")
            .count();
        assert_eq!(target_attempts, 3);
        assert_eq!(controller.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_health_record_forces_login_immediately() {
        let navigator = Arc::new(FakeNavigator::default());
        let health = Arc::new(SessionPersistenceStateManager::new(
            Arc::new(MemoryStorage::new()),
            HealthConfig {
                max_retry_attempts: 1,
            },
        ));
        let controller =
            NavigationController::with_health(navigator.clone(), options(), false, health);

        let outcome = controller
            .handle_post_login_redirect(request(UserRole::User, None))
            .await;
        match outcome {
            RedirectOutcome::LoginRequired { recommendation } => {
                assert_eq!(recommendation.action, RecoveryAction::Reauth);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(
            navigator.calls().last(),
            Some(&("/login".to_string(), NavigationMechanism::Primary))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_timeout_cancels_pending_work() {
        let navigator = Arc::new(FakeNavigator::default());
        let mut slow = options();
        slow.verification_delay_ms = 60_000;
        let controller = Arc::new(NavigationController::new(navigator.clone(), slow, true));
        controller
            .schedule_redirect("/rooms".to_string(), 10_000)
            .unwrap();
        assert_eq!(controller.pending_timers(), 1);

        let running = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                controller
                    .handle_post_login_redirect(request(UserRole::User, None))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.handle_auth_timeout().unwrap();

        assert_eq!(running.await.unwrap(), RedirectOutcome::Cancelled);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(controller.pending_timers(), 0);
        let calls = navigator.calls();
        assert_eq!(
            calls.last(),
            Some(&("/login?timeout=true".to_string(), NavigationMechanism::Primary))
        );
        assert!(!calls.iter().any(|(path, _)| path == "/rooms"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_cancels_scheduled_retry() {
        let navigator = Arc::new(FakeNavigator::default());
        let controller = NavigationController::new(navigator.clone(), options(), false);

        let outcome = controller
            .handle_post_login_redirect(request(UserRole::User, None))
            .await;
        assert!(matches!(outcome, RedirectOutcome::RetryScheduled { .. }));
        controller.destroy();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(navigator.calls().len(), 1);
        assert_eq!(controller.navigation_state(), NavigationState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_redirect_fires() {
        let navigator = Arc::new(FakeNavigator::working());
        let controller = NavigationController::new(navigator.clone(), options(), true);
        controller
            .schedule_redirect("/rooms".to_string(), 3_000)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(3_100)).await;
        assert!(navigator.verify_navigated("/rooms".to_string()));
        assert_eq!(controller.pending_timers(), 0);
    }

    #[test]
    fn test_refused_login_redirect_is_a_navigation_error() {
        let navigator = Arc::new(FakeNavigator {
            refuse: true,
            ..FakeNavigator::default()
        });
        let controller = NavigationController::new(navigator, options(), true);
        let err = controller
            .redirect_to_login(RedirectReason::Error)
            .unwrap_err();
        assert!(
            matches!(err, AuthSyncError::Navigation { ref provider, .. } if provider == "/login")
        );
        assert!(controller.navigation_state().last_error.is_some());
    }

    #[test]
    fn test_close_context_delegates() {
        let navigator = Arc::new(FakeNavigator::default());
        let controller = NavigationController::new(navigator.clone(), options(), true);
        controller.close_context();
        assert_eq!(navigator.closed.load(Ordering::SeqCst), 1);
    }
}

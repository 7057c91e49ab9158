//! The shared auth state store and its subscriber set.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::envelope::StoredAuthState;
use super::watcher::PollingWatcher;
use super::{AuthState, AuthStatus};
use crate::config::PollingConfig;
use crate::error::AuthSyncError;
use crate::storage::{KeyValueStorage, PersistentStateStore, StorageResult, AUTH_STATE_KEY};
use crate::utils::now_ms;

/// Receives every change of the current [`AuthState`]; `None` means signed out or expired.
#[uniffi::export(with_foreign)]
pub trait AuthStateListener: Send + Sync {
    /// Called synchronously after the change is durably stored.
    fn on_state_change(&self, state: Option<AuthState>);
}

type Subscription = (u64, Arc<dyn AuthStateListener>);

/// State shared between the store handle and its polling task.
pub(super) struct StoreCore {
    storage: PersistentStateStore,
    max_age_ms: u64,
    listeners: Mutex<Vec<Subscription>>,
    next_subscription: AtomicU64,
    /// Timestamp of the last state delivered to listeners, `None` for "no state".
    last_seen: Mutex<Option<u64>>,
}

impl StoreCore {
    fn decode(raw: &str) -> Option<StoredAuthState> {
        match StoredAuthState::deserialize(raw) {
            Ok(envelope) => Some(envelope),
            Err(err) => {
                log::warn!("ignoring unreadable auth state: {err}");
                None
            }
        }
    }

    fn read_envelope(&self) -> Option<StoredAuthState> {
        self.storage.read(AUTH_STATE_KEY).as_deref().and_then(Self::decode)
    }

    fn fresh(&self, envelope: Option<StoredAuthState>, now: u64) -> Option<AuthState> {
        envelope
            .map(|envelope| envelope.state)
            .filter(|state| !state.is_stale(now, self.max_age_ms))
    }

    fn current_at(&self, now: u64) -> Option<AuthState> {
        self.fresh(self.read_envelope(), now)
    }

    /// Re-reads the shared store and notifies listeners if another context changed it.
    ///
    /// Returns whether a change was delivered. Only backend read failures are errors; corrupt
    /// and stale payloads read as "no state".
    pub(super) fn poll_at(&self, now: u64) -> StorageResult<bool> {
        let raw = self.storage.try_read(AUTH_STATE_KEY)?;
        let current = self.fresh(raw.as_deref().and_then(Self::decode), now);
        let timestamp = current.as_ref().map(|state| state.timestamp);
        {
            let mut last_seen = self.last_seen.lock().unwrap_or_else(PoisonError::into_inner);
            if *last_seen == timestamp {
                return Ok(false);
            }
            *last_seen = timestamp;
        }
        log::debug!("auth state changed in another context");
        self.notify(current.as_ref());
        Ok(true)
    }

    fn mark_seen(&self, timestamp: Option<u64>) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = timestamp;
    }

    fn notify(&self, state: Option<&AuthState>) {
        let listeners: Vec<Arc<dyn AuthStateListener>> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener.on_state_change(state.cloned());
        }
    }
}

/// Holds the single current [`AuthState`] and notifies subscribers of changes.
///
/// Storage failures never surface: a failed write is logged and not announced, an unreadable or
/// stale state reads as `None`. Subscriptions are local to this instance; changes written by other
/// contexts are picked up by the polling watcher started with [`AuthStateStore::start_polling`].
#[derive(uniffi::Object)]
pub struct AuthStateStore {
    core: Arc<StoreCore>,
    polling: PollingConfig,
    watcher: Mutex<Option<PollingWatcher>>,
}

#[uniffi::export]
impl AuthStateStore {
    /// Creates a store over `storage`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthSyncError::Configuration`] if `config` is invalid.
    #[uniffi::constructor]
    pub fn new(
        storage: Arc<dyn KeyValueStorage>,
        config: PollingConfig,
    ) -> Result<Self, AuthSyncError> {
        config.validate()?;
        Ok(Self::with_store(PersistentStateStore::new(storage), config))
    }

    /// Replaces the current state. Returns `false` if the write failed, in which case no
    /// subscriber is notified.
    #[allow(clippy::needless_pass_by_value)]
    pub fn set_auth_state(&self, state: AuthState) -> bool {
        self.set_auth_state_at(state, now_ms())
    }

    /// Returns the current state, or `None` if absent, unreadable or stale.
    #[must_use]
    pub fn get_auth_state(&self) -> Option<AuthState> {
        self.get_auth_state_at(now_ms())
    }

    /// Whether a fresh authenticated state is present.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.get_auth_state()
            .is_some_and(|state| state.status == AuthStatus::Authenticated)
    }

    /// Removes the current state and notifies subscribers with `None`.
    ///
    /// Clearing when nothing is stored is a no-op. Returns whether a state was removed.
    pub fn clear_auth_state(&self) -> bool {
        match self.core.storage.try_read(AUTH_STATE_KEY) {
            Ok(None) => return false,
            Ok(Some(_)) => {}
            Err(err) => log::warn!("clearing auth state without reading it first: {err}"),
        }
        if !self.core.storage.clear(AUTH_STATE_KEY) {
            return false;
        }
        self.core.mark_seen(None);
        self.core.notify(None);
        true
    }

    /// Registers `listener` and returns a subscription id for [`Self::unsubscribe`].
    pub fn on_state_change(&self, listener: Arc<dyn AuthStateListener>) -> u64 {
        let id = self.core.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.core
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    /// Removes a subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, subscription: u64) -> bool {
        let mut listeners = self.core.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != subscription);
        listeners.len() != before
    }

    /// Starts the cross-context watcher on the current tokio runtime. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`AuthSyncError::Environment`] when called outside a tokio runtime.
    pub fn start_polling(&self) -> Result<(), AuthSyncError> {
        let mut watcher = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        if watcher.as_ref().is_some_and(|w| !w.is_finished()) {
            return Ok(());
        }
        self.core.mark_seen(self.get_auth_state().map(|state| state.timestamp));
        *watcher = Some(PollingWatcher::spawn(
            Arc::clone(&self.core),
            self.polling.clone(),
        )?);
        Ok(())
    }

    /// Checks the shared store immediately and resumes a watcher that gave up after repeated
    /// read failures. Returns whether a change was delivered.
    pub fn check_now(&self) -> bool {
        let changed = self.core.poll_at(now_ms()).unwrap_or_else(|err| {
            log::warn!("auth state check failed: {err}");
            false
        });
        if let Some(watcher) = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            watcher.wake();
        }
        changed
    }

    /// Whether the cross-context watcher is running.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|w| !w.is_finished())
    }

    /// Stops the watcher. No callback fires after this returns.
    pub fn destroy(&self) {
        if self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            log::debug!("auth state watcher stopped");
        }
    }

    /// Drops every subscriber, stops the watcher and erases the stored state without notifying.
    ///
    /// Intended for test isolation and full sign-out flows that tear the client down.
    pub fn reset(&self) {
        self.destroy();
        self.core
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.core.storage.clear(AUTH_STATE_KEY);
        self.core.mark_seen(None);
    }
}

impl AuthStateStore {
    /// Creates a store over an existing [`PersistentStateStore`]. `config` must already be
    /// validated.
    #[must_use]
    pub fn with_store(storage: PersistentStateStore, config: PollingConfig) -> Self {
        Self {
            core: Arc::new(StoreCore {
                storage,
                max_age_ms: config.max_age_ms,
                listeners: Mutex::new(Vec::new()),
                next_subscription: AtomicU64::new(1),
                last_seen: Mutex::new(None),
            }),
            polling: config,
            watcher: Mutex::new(None),
        }
    }

    /// [`Self::set_auth_state`] with an explicit write time.
    pub fn set_auth_state_at(&self, state: AuthState, now: u64) -> bool {
        let created_at = self
            .core
            .read_envelope()
            .map(|previous| previous.metadata.created_at);
        let envelope = StoredAuthState::new(state, created_at, now);
        let raw = match envelope.serialize() {
            Ok(raw) => raw,
            Err(err) => {
                log::warn!("failed to encode auth state: {err}");
                return false;
            }
        };
        if !self.core.storage.write(AUTH_STATE_KEY, &raw) {
            log::warn!("auth state was not stored; subscribers not notified");
            return false;
        }
        self.core.mark_seen(Some(envelope.state.timestamp));
        self.core.notify(Some(&envelope.state));
        true
    }

    /// [`Self::get_auth_state`] evaluated at `now` (epoch milliseconds).
    #[must_use]
    pub fn get_auth_state_at(&self, now: u64) -> Option<AuthState> {
        self.core.current_at(now)
    }

    /// [`Self::check_now`] evaluated at `now`, without waking the watcher.
    pub fn check_at(&self, now: u64) -> bool {
        self.core.poll_at(now).unwrap_or_else(|err| {
            log::warn!("auth state check failed: {err}");
            false
        })
    }

    /// Maximum age of a state before readers treat it as absent.
    #[must_use]
    pub const fn max_age_ms(&self) -> u64 {
        self.polling.max_age_ms
    }
}

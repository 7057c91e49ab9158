#![allow(dead_code, missing_docs)]

//! Common test utilities shared across integration tests.

use std::sync::{Arc, Mutex};

use authsync_core::redirection::AuthResult;
use authsync_core::storage::MemoryStorage;
use authsync_core::{
    AuthState, AuthStateListener, AuthSync, AuthSyncConfig, AuthSyncError, NavigationMechanism,
    Navigator, NotificationSink, RecoveryNotice, RedirectionConfig,
};

pub const BASE_URL: &str = "https://rooms.example.com";

/// Navigator whose location follows every navigation, or none when stuck.
pub struct FakeNavigator {
    location: Mutex<String>,
    lands: bool,
    visits: Mutex<Vec<(String, NavigationMechanism)>>,
}

impl FakeNavigator {
    pub fn new() -> Self {
        Self {
            location: Mutex::new(String::new()),
            lands: true,
            visits: Mutex::new(Vec::new()),
        }
    }

    /// Accepts navigations but never actually moves.
    pub fn stuck() -> Self {
        Self {
            lands: false,
            ..Self::new()
        }
    }

    pub fn visits(&self) -> Vec<String> {
        self.visits
            .lock()
            .unwrap()
            .iter()
            .map(|(path, _)| path.clone())
            .collect()
    }

    pub fn last_visit(&self) -> Option<String> {
        self.visits().pop()
    }
}

impl Default for FakeNavigator {
    fn default() -> Self {
        Self::new()
    }
}

impl Navigator for FakeNavigator {
    fn navigate(&self, path: String, mechanism: NavigationMechanism) -> Result<(), AuthSyncError> {
        self.visits.lock().unwrap().push((path.clone(), mechanism));
        if self.lands {
            *self.location.lock().unwrap() = path;
        }
        Ok(())
    }

    fn verify_navigated(&self, path: String) -> bool {
        *self.location.lock().unwrap() == path
    }

    fn close(&self) {}
}

#[derive(Default)]
pub struct RecordingSink {
    notices: Mutex<Vec<RecoveryNotice>>,
}

impl RecordingSink {
    pub fn notices(&self) -> Vec<RecoveryNotice> {
        self.notices.lock().unwrap().clone()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notice: RecoveryNotice) {
        self.notices.lock().unwrap().push(notice);
    }
}

#[derive(Default)]
pub struct RecordingListener {
    states: Mutex<Vec<Option<AuthState>>>,
}

impl RecordingListener {
    pub fn states(&self) -> Vec<Option<AuthState>> {
        self.states.lock().unwrap().clone()
    }
}

impl AuthStateListener for RecordingListener {
    fn on_state_change(&self, state: Option<AuthState>) {
        self.states.lock().unwrap().push(state);
    }
}

pub fn config() -> AuthSyncConfig {
    AuthSyncConfig {
        redirection: RedirectionConfig {
            base_url: BASE_URL.to_string(),
            ..RedirectionConfig::default()
        },
        ..AuthSyncConfig::default()
    }
}

/// A client for one browsing context on the shared origin storage.
pub struct Context {
    pub client: AuthSync,
    pub navigator: Arc<FakeNavigator>,
    pub sink: Arc<RecordingSink>,
}

impl Context {
    pub fn new(storage: &Arc<MemoryStorage>) -> Self {
        Self::with_navigator(storage, FakeNavigator::new())
    }

    pub fn with_navigator(storage: &Arc<MemoryStorage>, navigator: FakeNavigator) -> Self {
        let navigator = Arc::new(navigator);
        let sink = Arc::new(RecordingSink::default());
        let client = AuthSync::new(storage.clone(), navigator.clone(), sink.clone(), config())
            .expect("valid config");
        Self {
            client,
            navigator,
            sink,
        }
    }
}

pub fn signed_in(user_id: &str) -> AuthResult {
    AuthResult::succeeded(user_id.to_string(), Some(format!("token-{user_id}")))
}

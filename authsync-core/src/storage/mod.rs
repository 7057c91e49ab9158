//! Storage abstraction shared by every browsing context of an origin.
//!
//! The host provides a synchronous, origin-scoped, string-keyed [`KeyValueStorage`]
//! (`localStorage` in a browser, `UserDefaults`/`SharedPreferences` in a native shell). The core
//! only ever talks to it through [`PersistentStateStore`], which absorbs every backend failure.
//!
//! # Platform Implementations
//!
//! - Browser (WASM): `window.localStorage`
//! - iOS (Swift): `UserDefaults` in an app group shared with extensions
//! - Android (Kotlin): `SharedPreferences`
//! - Tests: [`MemoryStorage`]

pub mod error;
pub mod memory;
pub mod persistent;
pub mod traits;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStorage;
pub use persistent::PersistentStateStore;
pub use traits::KeyValueStorage;

/// Key holding the current versioned auth state envelope.
pub const AUTH_STATE_KEY: &str = "authsync.auth_state";
/// Key holding the session health record.
pub const SESSION_PERSISTENCE_KEY: &str = "authsync.session_persistence";
/// Key holding the performance ledger.
pub const PERFORMANCE_METRICS_KEY: &str = "authsync.performance_metrics";
/// Key holding the return URL saved before leaving for an identity provider.
pub const PENDING_RETURN_URL_KEY: &str = "authsync.pending_return_url";

#![deny(clippy::all, clippy::pedantic, clippy::nursery)]
//! Cross-context authentication state synchronization and recovery.
//!
//! An authentication flow that completes in a detached context (popup, redirected tab, installed
//! app window) reports its outcome through a return URL. This crate decodes that outcome,
//! reconciles it into a single persisted [`AuthState`], tracks the health of that reconciliation
//! and resolves where the user should be sent afterwards.
//!
//! Platform capabilities (key/value storage, navigation, logging, user notifications) are
//! provided by the host through foreign traits so the same core runs behind a browser, a webview
//! or a native shell.

mod config;
pub use config::*;

mod error;
pub use error::*;

pub mod auth_state;
pub use auth_state::{AuthSource, AuthState, AuthStateListener, AuthStateStore, AuthStatus};

pub mod logger;

pub mod navigation;
pub use navigation::{
    NavigationController, NavigationMechanism, NavigationState, Navigator, RedirectListener,
    RedirectOutcome, RedirectReason, RedirectRequest, UserProfile, UserRole,
};

pub mod redirection;
pub use redirection::{build_return_url, parse_return_url, AuthResult, RedirectionCodec};

pub mod session_health;
pub use session_health::{
    CookieStatus, PersistenceStatus, RecoveryAction, RecoveryPriority, RecoveryRecommendation,
    SessionPersistenceError, SessionPersistenceStateManager, SyncErrorKind,
};

pub mod storage;

mod coordinator;
pub use coordinator::*;

// private modules
mod utils;

uniffi::setup_scaffolding!("authsync_core");

//! Health tracking for the persisted session and the recovery policy built on top of it.
//!
//! The manager keeps a small, bounded record of how session synchronization has been going:
//! cookie state, whether the request interception layer accepted the session, the last few
//! errors and a performance ledger. From that record it recommends what to do next.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

mod manager;
mod metrics;
mod ring;

pub use manager::{HealthSummary, SessionPersistenceError, SessionPersistenceStateManager};
pub use metrics::{MetricOperation, OperationResult, PerformanceMetrics};

/// Overall state of the persisted session.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Display,
    EnumString,
    Serialize,
    Deserialize,
    uniffi::Enum,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PersistenceStatus {
    /// No usable session.
    #[default]
    Invalid,
    /// Cookie is valid, the interception layer has not confirmed it yet.
    Syncing,
    /// Cookie is valid and accepted.
    Active,
}

/// State of the session cookie.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Display,
    EnumString,
    Serialize,
    Deserialize,
    uniffi::Enum,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CookieStatus {
    /// No session cookie was issued.
    #[default]
    Missing,
    /// Present but rejected, e.g. expired.
    Invalid,
    /// Present but unreadable.
    Corrupted,
    /// Present and accepted.
    Valid,
}

/// Where a sync failure originated.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize, uniffi::Enum,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SyncErrorKind {
    /// Issuing the session cookie failed.
    CookieGeneration,
    /// The session cookie did not validate.
    CookieValidation,
    /// The request interception layer rejected the session.
    MiddlewareCompatibility,
    /// Reconciling an authentication result failed.
    SessionSync,
    /// The persistent store failed.
    Storage,
    /// A request did not reach the backend.
    Network,
    /// The post-login redirect could not be completed.
    Navigation,
    /// Anything else.
    Unknown,
}

/// What the recovery policy suggests.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize, uniffi::Enum,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecoveryAction {
    /// Try the same sync again.
    Retry,
    /// Issue a fresh session cookie.
    Regenerate,
    /// Drop the persisted session.
    Clear,
    /// Send the user back to sign in.
    Reauth,
}

/// Urgency of a [`RecoveryRecommendation`], ordered from least to most urgent.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    Serialize,
    Deserialize,
    uniffi::Enum,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecoveryPriority {
    /// Can wait for the next natural retry.
    Low,
    /// Worth acting on soon.
    Medium,
    /// The session is unusable until acted on.
    High,
    /// The user must sign in again.
    Critical,
}

/// Outcome of one request through the interception layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
#[serde(rename_all = "camelCase")]
pub struct MiddlewareTestResult {
    /// Epoch milliseconds.
    pub timestamp: u64,
    /// Whether the layer accepted the session.
    pub success: bool,
    /// Round trip of the test request.
    pub response_time_ms: u64,
    /// Cookie format the layer saw, e.g. `base64-json`.
    pub cookie_format: String,
}

/// A classified sync failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
#[serde(rename_all = "camelCase")]
pub struct SessionSyncError {
    /// Where the failure originated.
    pub kind: SyncErrorKind,
    /// Description for logs.
    pub message: String,
    /// Whether retrying may help.
    pub recoverable: bool,
    /// Epoch milliseconds.
    pub timestamp: u64,
}

/// Advice produced by the recovery policy. Advisory only; the caller decides.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct RecoveryRecommendation {
    /// What to do.
    pub action: RecoveryAction,
    /// How urgently.
    pub priority: RecoveryPriority,
    /// Human readable explanation, suitable for logs.
    pub reason: String,
}

/// The persisted health record.
///
/// `performance_metrics` is stored under its own key and is not part of the serialized record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, uniffi::Record)]
#[serde(rename_all = "camelCase")]
pub struct SessionPersistenceState {
    /// Random identifier of this record.
    pub session_id: String,
    /// Overall state of the session.
    #[serde(default)]
    pub persistence_status: PersistenceStatus,
    /// State of the session cookie.
    #[serde(default)]
    pub cookie_status: CookieStatus,
    /// Cookie generations attempted.
    #[serde(default)]
    pub cookie_generation_attempts: u32,
    /// Result of the latest interception layer test.
    #[serde(default)]
    pub middleware_compatible: bool,
    /// Most recent interception layer tests, oldest first.
    #[serde(default)]
    pub middleware_test_results: Vec<MiddlewareTestResult>,
    /// Most recent sync errors, oldest first.
    #[serde(default)]
    pub sync_errors: Vec<SessionSyncError>,
    /// Recovery attempts since the last successful sync.
    #[serde(default)]
    pub recovery_attempts: u32,
    /// Epoch milliseconds of the latest recovery attempt.
    #[serde(default)]
    pub last_recovery_time: Option<u64>,
    /// Sync attempts since the record was created.
    #[serde(default)]
    pub total_syncs: u64,
    /// Timing ledger, persisted separately.
    #[serde(skip)]
    pub performance_metrics: PerformanceMetrics,
}

impl SessionPersistenceState {
    /// A blank record for a new session.
    #[must_use]
    pub fn new() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            persistence_status: PersistenceStatus::default(),
            cookie_status: CookieStatus::default(),
            cookie_generation_attempts: 0,
            middleware_compatible: false,
            middleware_test_results: Vec::new(),
            sync_errors: Vec::new(),
            recovery_attempts: 0,
            last_recovery_time: None,
            total_syncs: 0,
            performance_metrics: PerformanceMetrics::default(),
        }
    }

    /// Status implied by the cookie and the interception layer.
    #[must_use]
    pub const fn derived_status(&self) -> PersistenceStatus {
        match (self.cookie_status, self.middleware_compatible) {
            (CookieStatus::Valid, true) => PersistenceStatus::Active,
            (CookieStatus::Valid, false) => PersistenceStatus::Syncing,
            _ => PersistenceStatus::Invalid,
        }
    }
}

impl Default for SessionPersistenceState {
    fn default() -> Self {
        Self::new()
    }
}

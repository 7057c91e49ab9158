//! The session health manager: persisted record, mutations and the recovery policy.

use std::sync::{Arc, PoisonError, RwLock};

use super::metrics::{MetricOperation, PerformanceMetrics};
use super::ring::{
    prune_expired, push_bounded, truncate_oldest, MIDDLEWARE_HISTORY, SYNC_ERROR_HISTORY,
};
use super::{
    CookieStatus, MiddlewareTestResult, PersistenceStatus, RecoveryAction, RecoveryPriority,
    RecoveryRecommendation, SessionPersistenceState, SessionSyncError, SyncErrorKind,
};
use crate::config::HealthConfig;
use crate::error::AuthSyncError;
use crate::storage::{
    KeyValueStorage, PersistentStateStore, PERFORMANCE_METRICS_KEY, SESSION_PERSISTENCE_KEY,
};
use crate::utils::now_ms;

/// A sync failure packaged with the health snapshot at the time it happened.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, uniffi::Record)]
#[error(
    "{kind} error: {message} (recovery attempts: {recovery_attempts}, cookie: {cookie_status}, \
     middleware compatible: {middleware_compatible}, recommended: {recommended_action})"
)]
pub struct SessionPersistenceError {
    /// Where the failure originated.
    pub kind: SyncErrorKind,
    /// Description for logs.
    pub message: String,
    /// Health record the failure belongs to.
    pub session_id: String,
    /// Recovery attempts at the time of the failure.
    pub recovery_attempts: u32,
    /// Cookie state at the time of the failure.
    pub cookie_status: CookieStatus,
    /// Interception layer state at the time of the failure.
    pub middleware_compatible: bool,
    /// What the recovery policy suggested.
    pub recommended_action: RecoveryAction,
    /// Urgency of the suggestion.
    pub priority: RecoveryPriority,
    /// Epoch milliseconds.
    pub timestamp: u64,
}

impl From<SessionPersistenceError> for AuthSyncError {
    fn from(error: SessionPersistenceError) -> Self {
        match error.kind {
            SyncErrorKind::Network => Self::Network(error.to_string()),
            SyncErrorKind::Unknown => Self::Unknown(error.to_string()),
            SyncErrorKind::Navigation => Self::Navigation {
                provider: "post-login redirect".to_string(),
                reason: error.to_string(),
            },
            _ => Self::Storage(error.to_string()),
        }
    }
}

/// Condensed view of the health record for dashboards and logs.
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct HealthSummary {
    /// Identifier of the health record.
    pub session_id: String,
    /// Overall state of the session.
    pub persistence_status: PersistenceStatus,
    /// State of the session cookie.
    pub cookie_status: CookieStatus,
    /// Result of the latest interception layer test.
    pub middleware_compatible: bool,
    /// Recovery attempts since the last successful sync.
    pub recovery_attempts: u32,
    /// Sync attempts since the record was created.
    pub total_syncs: u64,
    /// Sync errors currently retained.
    pub recent_errors: u32,
    /// Session sync success rate over the retained samples.
    pub success_rate: f64,
    /// Mean session sync duration over the retained samples.
    pub average_response_time_ms: f64,
    /// Current recovery recommendation.
    pub recommendation: RecoveryRecommendation,
}

/// Recovery policy. The first matching rule wins.
fn recommend(state: &SessionPersistenceState, config: &HealthConfig) -> RecoveryRecommendation {
    let (action, priority, reason) = if state.recovery_attempts >= config.max_retry_attempts {
        (
            RecoveryAction::Reauth,
            RecoveryPriority::Critical,
            format!(
                "{} recovery attempts exhausted the limit of {}",
                state.recovery_attempts, config.max_retry_attempts
            ),
        )
    } else if !state.middleware_compatible && state.sync_errors.len() >= 2 {
        (
            RecoveryAction::Clear,
            RecoveryPriority::High,
            format!(
                "session rejected by the interception layer with {} recent errors",
                state.sync_errors.len()
            ),
        )
    } else if matches!(
        state.cookie_status,
        CookieStatus::Corrupted | CookieStatus::Invalid
    ) {
        (
            RecoveryAction::Regenerate,
            RecoveryPriority::Medium,
            format!("session cookie is {}", state.cookie_status),
        )
    } else if state.sync_errors.last().is_some_and(|error| error.recoverable) {
        (
            RecoveryAction::Retry,
            RecoveryPriority::Low,
            "last sync error is recoverable".to_string(),
        )
    } else {
        (
            RecoveryAction::Retry,
            RecoveryPriority::Low,
            "no specific issue detected".to_string(),
        )
    };
    RecoveryRecommendation {
        action,
        priority,
        reason,
    }
}

/// Tracks the health of the persisted session and recommends recovery steps.
///
/// The record is hydrated from storage on construction and written back after every mutation,
/// so a reload (or another context on the same origin) continues where this instance left off.
/// Storage failures are logged and otherwise ignored; the in-memory record stays authoritative.
#[derive(uniffi::Object)]
pub struct SessionPersistenceStateManager {
    storage: PersistentStateStore,
    config: HealthConfig,
    state: RwLock<SessionPersistenceState>,
}

#[uniffi::export]
impl SessionPersistenceStateManager {
    /// Creates a manager, resuming the record persisted in `storage` if there is one.
    #[uniffi::constructor]
    #[must_use]
    pub fn new(storage: Arc<dyn KeyValueStorage>, config: HealthConfig) -> Self {
        Self::with_store(PersistentStateStore::new(storage), config)
    }

    /// Replaces the session id and status, e.g. after the server issued a new session.
    pub fn update_session(&self, session_id: String, status: PersistenceStatus) {
        self.mutate(|state| {
            state.session_id = session_id;
            state.persistence_status = status;
        });
    }

    /// Records the latest cookie check and re-derives the persistence status.
    pub fn update_cookie_status(&self, status: CookieStatus) {
        self.mutate(|state| {
            state.cookie_status = status;
            state.persistence_status = state.derived_status();
        });
        log::debug!("session cookie is {status}");
    }

    /// Records an interception layer test, including its duration sample.
    pub fn update_middleware_compatibility(&self, result: MiddlewareTestResult) {
        self.mutate(|state| {
            state.middleware_compatible = result.success;
            state.performance_metrics.record(
                MetricOperation::MiddlewareTest,
                result.response_time_ms,
                result.success,
            );
            push_bounded(&mut state.middleware_test_results, result, MIDDLEWARE_HISTORY);
            state.persistence_status = state.derived_status();
        });
    }

    /// Records a cookie generation and its duration.
    pub fn record_cookie_generation(&self, duration_ms: u64, success: bool) {
        self.mutate(|state| {
            state.cookie_generation_attempts += 1;
            state
                .performance_metrics
                .record(MetricOperation::CookieGeneration, duration_ms, success);
        });
    }

    /// Records a cookie validation and its duration.
    pub fn record_cookie_validation(&self, duration_ms: u64, success: bool) {
        self.mutate(|state| {
            state
                .performance_metrics
                .record(MetricOperation::CookieValidation, duration_ms, success);
        });
    }

    /// Records an interception layer test duration without a full test result.
    pub fn record_middleware_test(&self, duration_ms: u64, success: bool) {
        self.mutate(|state| {
            state
                .performance_metrics
                .record(MetricOperation::MiddlewareTest, duration_ms, success);
        });
    }

    /// Records one reconciliation of the auth state.
    pub fn record_sync_attempt(&self, duration_ms: u64, success: bool) {
        self.mutate(|state| {
            state.total_syncs += 1;
            state
                .performance_metrics
                .record(MetricOperation::SessionSync, duration_ms, success);
        });
    }

    /// Classifies and records a sync failure. Returns the stored entry.
    pub fn add_sync_error(
        &self,
        kind: SyncErrorKind,
        message: String,
        recoverable: bool,
    ) -> SessionSyncError {
        let error = SessionSyncError {
            kind,
            message,
            recoverable,
            timestamp: now_ms(),
        };
        self.record_sync_error(error.clone());
        error
    }

    /// Records an already classified sync failure.
    pub fn record_sync_error(&self, error: SessionSyncError) {
        log::warn!("session sync error ({}): {}", error.kind, error.message);
        self.mutate(|state| push_bounded(&mut state.sync_errors, error, SYNC_ERROR_HISTORY));
    }

    /// Counts a recovery attempt.
    pub fn record_recovery_attempt(&self) {
        let now = now_ms();
        self.mutate(|state| {
            state.recovery_attempts += 1;
            state.last_recovery_time = Some(now);
        });
    }

    /// Forgets recovery attempts and sync errors after a successful sync.
    pub fn reset_recovery(&self) {
        self.mutate(|state| {
            state.recovery_attempts = 0;
            state.sync_errors.clear();
        });
    }

    /// Evaluates the recovery policy against the current record. Never cached.
    #[must_use]
    pub fn get_recovery_recommendation(&self) -> RecoveryRecommendation {
        recommend(&self.read(), &self.config)
    }

    /// Packages a failure with the current health snapshot and the recommended action.
    #[must_use]
    pub fn create_session_persistence_error(
        &self,
        kind: SyncErrorKind,
        message: String,
    ) -> SessionPersistenceError {
        let state = self.read();
        let recommendation = recommend(&state, &self.config);
        SessionPersistenceError {
            kind,
            message,
            session_id: state.session_id.clone(),
            recovery_attempts: state.recovery_attempts,
            cookie_status: state.cookie_status,
            middleware_compatible: state.middleware_compatible,
            recommended_action: recommendation.action,
            priority: recommendation.priority,
            timestamp: now_ms(),
        }
    }

    /// Drops test results and errors older than one hour. Counters are kept.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup(&self) -> u32 {
        self.cleanup_at(now_ms())
    }

    /// Copy of the full record, including metrics.
    #[must_use]
    pub fn snapshot(&self) -> SessionPersistenceState {
        self.read()
    }

    /// Copy of the performance ledger.
    #[must_use]
    pub fn performance_metrics(&self) -> PerformanceMetrics {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .performance_metrics
            .clone()
    }

    /// Condensed view of the record.
    #[must_use]
    pub fn health_summary(&self) -> HealthSummary {
        let state = self.read();
        HealthSummary {
            recommendation: recommend(&state, &self.config),
            session_id: state.session_id,
            persistence_status: state.persistence_status,
            cookie_status: state.cookie_status,
            middleware_compatible: state.middleware_compatible,
            recovery_attempts: state.recovery_attempts,
            total_syncs: state.total_syncs,
            recent_errors: u32::try_from(state.sync_errors.len()).unwrap_or(u32::MAX),
            success_rate: state.performance_metrics.success_rate,
            average_response_time_ms: state.performance_metrics.average_response_time_ms,
        }
    }

    /// Starts over with a blank record under a new session id.
    /// Starts a fresh record under a new session id.
    pub fn reset(&self) {
        self.mutate(|state| *state = SessionPersistenceState::new());
    }
}

impl SessionPersistenceStateManager {
    /// Creates a manager over an existing [`PersistentStateStore`].
    #[must_use]
    pub fn with_store(storage: PersistentStateStore, config: HealthConfig) -> Self {
        let mut state = storage
            .read_json::<SessionPersistenceState>(SESSION_PERSISTENCE_KEY)
            .unwrap_or_default();
        state.performance_metrics = storage
            .read_json::<PerformanceMetrics>(PERFORMANCE_METRICS_KEY)
            .unwrap_or_default();
        truncate_oldest(&mut state.middleware_test_results, MIDDLEWARE_HISTORY);
        truncate_oldest(&mut state.sync_errors, SYNC_ERROR_HISTORY);
        state.performance_metrics.enforce_bounds();
        log::debug!("session health record {} loaded", state.session_id);

        Self {
            storage,
            config,
            state: RwLock::new(state),
        }
    }

    /// [`Self::cleanup`] evaluated at `now`.
    pub fn cleanup_at(&self, now: u64) -> u32 {
        let removed = self.mutate(|state| {
            prune_expired(&mut state.middleware_test_results, now, |r| r.timestamp)
                + prune_expired(&mut state.sync_errors, now, |e| e.timestamp)
        });
        if removed > 0 {
            log::debug!("pruned {removed} expired session health entries");
        }
        u32::try_from(removed).unwrap_or(u32::MAX)
    }

    fn read(&self) -> SessionPersistenceState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Applies `update` and writes the record back while still holding the lock, so concurrent
    /// mutations reach storage in the order they were applied.
    fn mutate<R>(&self, update: impl FnOnce(&mut SessionPersistenceState) -> R) -> R {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let result = update(&mut state);
        if !self.storage.write_json(SESSION_PERSISTENCE_KEY, &*state) {
            log::warn!("session health record not persisted");
        }
        if !self
            .storage
            .write_json(PERFORMANCE_METRICS_KEY, &state.performance_metrics)
        {
            log::warn!("performance metrics not persisted");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::storage::MemoryStorage;

    fn manager() -> (Arc<MemoryStorage>, SessionPersistenceStateManager) {
        let storage = Arc::new(MemoryStorage::new());
        let manager = SessionPersistenceStateManager::new(storage.clone(), HealthConfig::default());
        (storage, manager)
    }

    fn middleware_result(success: bool, timestamp: u64) -> MiddlewareTestResult {
        MiddlewareTestResult {
            timestamp,
            success,
            response_time_ms: 12,
            cookie_format: "base64-json".to_string(),
        }
    }

    fn sync_error(kind: SyncErrorKind, recoverable: bool, timestamp: u64) -> SessionSyncError {
        SessionSyncError {
            kind,
            message: format!("{kind} failed"),
            recoverable,
            timestamp,
        }
    }

    #[test]
    fn test_status_follows_cookie_and_middleware() {
        let (_, manager) = manager();
        manager.update_cookie_status(CookieStatus::Valid);
        assert_eq!(manager.snapshot().persistence_status, PersistenceStatus::Syncing);
        manager.update_middleware_compatibility(middleware_result(true, 1));
        assert_eq!(manager.snapshot().persistence_status, PersistenceStatus::Active);
        manager.update_cookie_status(CookieStatus::Corrupted);
        assert_eq!(manager.snapshot().persistence_status, PersistenceStatus::Invalid);
    }

    #[test]
    fn test_middleware_history_is_bounded() {
        let (_, manager) = manager();
        for timestamp in 0..12 {
            manager.update_middleware_compatibility(middleware_result(true, timestamp));
        }
        let timestamps: Vec<u64> = manager
            .snapshot()
            .middleware_test_results
            .iter()
            .map(|r| r.timestamp)
            .collect();
        assert_eq!(timestamps, (2..12).collect::<Vec<_>>());
        assert_eq!(manager.performance_metrics().middleware_test_times.len(), 12);
    }

    #[test]
    fn test_sync_error_history_is_bounded() {
        let (_, manager) = manager();
        for timestamp in 0..7 {
            manager.record_sync_error(sync_error(SyncErrorKind::Storage, true, timestamp));
        }
        let errors = manager.snapshot().sync_errors;
        assert_eq!(errors.len(), 5);
        assert_eq!(errors.first().map(|e| e.timestamp), Some(2));
        assert_eq!(errors.last().map(|e| e.timestamp), Some(6));
    }

    #[test]
    fn test_reauth_wins_over_everything() {
        let (_, manager) = manager();
        manager.update_cookie_status(CookieStatus::Corrupted);
        manager.record_sync_error(sync_error(SyncErrorKind::MiddlewareCompatibility, false, 1));
        manager.record_sync_error(sync_error(SyncErrorKind::MiddlewareCompatibility, false, 2));
        for _ in 0..3 {
            manager.record_recovery_attempt();
        }
        let recommendation = manager.get_recovery_recommendation();
        assert_eq!(recommendation.action, RecoveryAction::Reauth);
        assert_eq!(recommendation.priority, RecoveryPriority::Critical);
        assert!(manager.snapshot().last_recovery_time.is_some());
    }

    #[test]
    fn test_incompatible_middleware_with_errors_clears() {
        let (_, manager) = manager();
        manager.update_middleware_compatibility(middleware_result(false, 1));
        manager.record_sync_error(sync_error(SyncErrorKind::MiddlewareCompatibility, false, 1));
        manager.record_sync_error(sync_error(SyncErrorKind::MiddlewareCompatibility, false, 2));
        let recommendation = manager.get_recovery_recommendation();
        assert_eq!(recommendation.action, RecoveryAction::Clear);
        assert_eq!(recommendation.priority, RecoveryPriority::High);
    }

    #[test_case(CookieStatus::Corrupted => (RecoveryAction::Regenerate, RecoveryPriority::Medium))]
    #[test_case(CookieStatus::Invalid => (RecoveryAction::Regenerate, RecoveryPriority::Medium))]
    #[test_case(CookieStatus::Missing => (RecoveryAction::Retry, RecoveryPriority::Low))]
    #[test_case(CookieStatus::Valid => (RecoveryAction::Retry, RecoveryPriority::Low))]
    fn test_cookie_driven_recommendation(
        status: CookieStatus,
    ) -> (RecoveryAction, RecoveryPriority) {
        let (_, manager) = manager();
        manager.update_cookie_status(status);
        let recommendation = manager.get_recovery_recommendation();
        (recommendation.action, recommendation.priority)
    }

    #[test]
    fn test_recoverable_error_suggests_retry() {
        let (_, manager) = manager();
        manager.add_sync_error(SyncErrorKind::Network, "offline".to_string(), true);
        let recommendation = manager.get_recovery_recommendation();
        assert_eq!(recommendation.action, RecoveryAction::Retry);
        assert_eq!(recommendation.reason, "last sync error is recoverable");
    }

    #[test]
    fn test_reset_recovery() {
        let (_, manager) = manager();
        manager.record_recovery_attempt();
        manager.add_sync_error(SyncErrorKind::SessionSync, "x".to_string(), false);
        manager.reset_recovery();
        let state = manager.snapshot();
        assert_eq!(state.recovery_attempts, 0);
        assert!(state.sync_errors.is_empty());
    }

    #[test]
    fn test_create_error_snapshots_health() {
        let (_, manager) = manager();
        manager.update_cookie_status(CookieStatus::Invalid);
        manager.record_recovery_attempt();
        let error = manager.create_session_persistence_error(
            SyncErrorKind::CookieValidation,
            "signature mismatch".to_string(),
        );
        assert_eq!(error.recovery_attempts, 1);
        assert_eq!(error.cookie_status, CookieStatus::Invalid);
        assert_eq!(error.recommended_action, RecoveryAction::Regenerate);
        assert!(error.to_string().contains("cookie_validation error: signature mismatch"));
        assert!(matches!(AuthSyncError::from(error), AuthSyncError::Storage(_)));
    }

    #[test]
    fn test_cleanup_prunes_old_entries_but_keeps_counters() {
        let (_, manager) = manager();
        let hour = 60 * 60 * 1_000;
        manager.update_middleware_compatibility(middleware_result(true, 1_000));
        manager.update_middleware_compatibility(middleware_result(true, hour + 2_000));
        manager.record_sync_error(sync_error(SyncErrorKind::Storage, true, 1_000));
        manager.record_sync_attempt(40, true);
        manager.record_recovery_attempt();

        assert_eq!(manager.cleanup_at(hour + 1_001), 2);
        let state = manager.snapshot();
        assert_eq!(state.middleware_test_results.len(), 1);
        assert!(state.sync_errors.is_empty());
        assert_eq!(state.total_syncs, 1);
        assert_eq!(state.recovery_attempts, 1);
        assert_eq!(state.performance_metrics.total_operations, 3);
    }

    #[test]
    fn test_record_is_hydrated_from_storage() {
        let (storage, manager) = manager();
        manager.update_session("s-1".to_string(), PersistenceStatus::Syncing);
        manager.record_cookie_generation(15, true);
        manager.record_cookie_validation(5, false);
        manager.record_sync_attempt(25, true);

        let reloaded = SessionPersistenceStateManager::new(storage, HealthConfig::default());
        let state = reloaded.snapshot();
        assert_eq!(state.session_id, "s-1");
        assert_eq!(state.persistence_status, PersistenceStatus::Syncing);
        assert_eq!(state.cookie_generation_attempts, 1);
        assert_eq!(state.total_syncs, 1);
        assert_eq!(state.performance_metrics.session_sync_times, vec![25]);
        assert_eq!(state.performance_metrics.total_operations, 3);
        assert_eq!(state.performance_metrics.successful_operations, 2);
    }

    #[test]
    fn test_corrupted_record_starts_fresh() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set_item(SESSION_PERSISTENCE_KEY.to_string(), "[1,2".to_string())
            .unwrap();
        let manager = SessionPersistenceStateManager::new(storage, HealthConfig::default());
        assert_eq!(manager.snapshot().total_syncs, 0);
    }

    #[test]
    fn test_storage_failures_do_not_lose_in_memory_state() {
        let (storage, manager) = manager();
        storage.set_fail_writes(true);
        manager.record_sync_attempt(10, false);
        assert_eq!(manager.snapshot().total_syncs, 1);
    }

    #[test]
    fn test_health_summary() {
        let (_, manager) = manager();
        manager.record_sync_attempt(10, true);
        manager.record_sync_attempt(30, false);
        let summary = manager.health_summary();
        assert_eq!(summary.total_syncs, 2);
        assert!((summary.success_rate - 0.5).abs() < f64::EPSILON);
        assert!((summary.average_response_time_ms - 20.0).abs() < f64::EPSILON);
        assert_eq!(summary.recommendation.action, RecoveryAction::Retry);
    }

    #[test]
    fn test_reset_assigns_new_session() {
        let (_, manager) = manager();
        let before = manager.snapshot().session_id;
        manager.record_sync_attempt(1, true);
        manager.reset();
        let state = manager.snapshot();
        assert_ne!(state.session_id, before);
        assert_eq!(state.total_syncs, 0);
        assert_eq!(state.performance_metrics, PerformanceMetrics::default());
    }
}

//! Sliding window performance ledger.

use serde::{Deserialize, Serialize};

use super::ring::{push_bounded, truncate_oldest, METRIC_SAMPLES};

/// Operation a performance sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, uniffi::Enum)]
#[serde(rename_all = "snake_case")]
pub enum MetricOperation {
    /// Issuing the session cookie.
    CookieGeneration,
    /// Validating the session cookie.
    CookieValidation,
    /// A request through the interception layer.
    MiddlewareTest,
    /// Reconciling an authentication result.
    SessionSync,
}

/// Outcome of one retained operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
pub struct OperationResult {
    /// Operation kind.
    pub operation: MetricOperation,
    /// Whether it succeeded.
    pub success: bool,
}

/// Sliding window of operation durations plus aggregates.
///
/// Every aggregate is recomputed from the samples currently held after each insert, so it
/// describes the last [`METRIC_SAMPLES`] operations of each kind. Only the two operation counters
/// are cumulative.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, uniffi::Record)]
#[serde(default, rename_all = "camelCase")]
pub struct PerformanceMetrics {
    /// Durations of the latest cookie generations, oldest first.
    pub cookie_generation_times: Vec<u64>,
    /// Durations of the latest cookie validations, oldest first.
    pub cookie_validation_times: Vec<u64>,
    /// Durations of the latest interception layer tests, oldest first.
    pub middleware_test_times: Vec<u64>,
    /// Durations of the latest session syncs, oldest first.
    pub session_sync_times: Vec<u64>,
    /// Outcomes of the retained operations, oldest first.
    pub recent_results: Vec<OperationResult>,
    /// Operations recorded since the ledger was created.
    pub total_operations: u64,
    /// Successful operations recorded since the ledger was created.
    pub successful_operations: u64,
    /// Share of successes among [`Self::recent_results`], `0` before the first operation.
    pub success_rate: f64,
    /// Mean of every retained duration.
    pub average_response_time_ms: f64,
    /// Shortest retained duration.
    pub min_response_time_ms: u64,
    /// Longest retained duration.
    pub max_response_time_ms: u64,
}

impl PerformanceMetrics {
    pub(super) fn record(&mut self, operation: MetricOperation, duration_ms: u64, success: bool) {
        let samples = match operation {
            MetricOperation::CookieGeneration => &mut self.cookie_generation_times,
            MetricOperation::CookieValidation => &mut self.cookie_validation_times,
            MetricOperation::MiddlewareTest => &mut self.middleware_test_times,
            MetricOperation::SessionSync => &mut self.session_sync_times,
        };
        push_bounded(samples, duration_ms, METRIC_SAMPLES);
        self.recent_results.push(OperationResult { operation, success });
        self.evict_results(operation);
        self.total_operations += 1;
        if success {
            self.successful_operations += 1;
        }
        self.recompute();
    }

    /// Re-applies the window bounds, e.g. after loading a record written with larger ones.
    pub(super) fn enforce_bounds(&mut self) {
        for samples in [
            &mut self.cookie_generation_times,
            &mut self.cookie_validation_times,
            &mut self.middleware_test_times,
            &mut self.session_sync_times,
        ] {
            truncate_oldest(samples, METRIC_SAMPLES);
        }
        for operation in [
            MetricOperation::CookieGeneration,
            MetricOperation::CookieValidation,
            MetricOperation::MiddlewareTest,
            MetricOperation::SessionSync,
        ] {
            self.evict_results(operation);
        }
        self.successful_operations = self.successful_operations.min(self.total_operations);
        self.recompute();
    }

    /// Drops the oldest results of `operation` beyond the sample window.
    fn evict_results(&mut self, operation: MetricOperation) {
        let held = self
            .recent_results
            .iter()
            .filter(|result| result.operation == operation)
            .count();
        let mut excess = held.saturating_sub(METRIC_SAMPLES);
        self.recent_results.retain(|result| {
            if excess > 0 && result.operation == operation {
                excess -= 1;
                return false;
            }
            true
        });
    }

    fn samples(&self) -> impl Iterator<Item = u64> + '_ {
        self.cookie_generation_times
            .iter()
            .chain(&self.cookie_validation_times)
            .chain(&self.middleware_test_times)
            .chain(&self.session_sync_times)
            .copied()
    }

    #[allow(clippy::cast_precision_loss)]
    fn recompute(&mut self) {
        let successes = self
            .recent_results
            .iter()
            .filter(|result| result.success)
            .count();
        self.success_rate = if self.recent_results.is_empty() {
            0.0
        } else {
            successes as f64 / self.recent_results.len() as f64
        };

        let (count, sum) = self
            .samples()
            .fold((0_u64, 0_u128), |(count, sum), sample| {
                (count + 1, sum + u128::from(sample))
            });
        self.average_response_time_ms = if count == 0 {
            0.0
        } else {
            sum as f64 / count as f64
        };
        self.min_response_time_ms = self.samples().min().unwrap_or(0);
        self.max_response_time_ms = self.samples().max().unwrap_or(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregates_follow_samples() {
        let mut metrics = PerformanceMetrics::default();
        metrics.record(MetricOperation::CookieGeneration, 10, true);
        metrics.record(MetricOperation::CookieValidation, 30, false);
        metrics.record(MetricOperation::SessionSync, 20, true);

        assert_eq!(metrics.total_operations, 3);
        assert_eq!(metrics.successful_operations, 2);
        assert!((metrics.success_rate - 2.0 / 3.0).abs() < f64::EPSILON);
        assert!((metrics.average_response_time_ms - 20.0).abs() < f64::EPSILON);
        assert_eq!(metrics.min_response_time_ms, 10);
        assert_eq!(metrics.max_response_time_ms, 30);
    }

    #[test]
    fn test_window_slides_and_aggregates_forget_old_samples() {
        let mut metrics = PerformanceMetrics::default();
        metrics.record(MetricOperation::MiddlewareTest, 1_000, true);
        for _ in 0..METRIC_SAMPLES {
            metrics.record(MetricOperation::MiddlewareTest, 5, true);
        }
        assert_eq!(metrics.middleware_test_times.len(), METRIC_SAMPLES);
        assert_eq!(metrics.max_response_time_ms, 5);
        assert_eq!(metrics.total_operations, 21);
    }

    #[test]
    fn test_success_rate_follows_the_window() {
        let mut metrics = PerformanceMetrics::default();
        for _ in 0..METRIC_SAMPLES {
            metrics.record(MetricOperation::SessionSync, 10, false);
        }
        metrics.record(MetricOperation::CookieGeneration, 10, true);
        for _ in 0..METRIC_SAMPLES {
            metrics.record(MetricOperation::SessionSync, 10, true);
        }

        assert_eq!(metrics.recent_results.len(), METRIC_SAMPLES + 1);
        assert!((metrics.success_rate - 1.0).abs() < f64::EPSILON);
        assert_eq!(metrics.total_operations, 41);
        assert_eq!(metrics.successful_operations, 21);
        assert_eq!(
            metrics.recent_results.first(),
            Some(&OperationResult {
                operation: MetricOperation::CookieGeneration,
                success: true,
            })
        );
    }

    #[test]
    fn test_enforce_bounds_trims_loaded_windows() {
        let mut metrics = PerformanceMetrics {
            cookie_generation_times: (0..30).collect(),
            total_operations: 30,
            successful_operations: 40,
            ..PerformanceMetrics::default()
        };
        metrics.enforce_bounds();
        assert_eq!(metrics.cookie_generation_times.first(), Some(&10));
        assert_eq!(metrics.successful_operations, 30);
        assert_eq!(metrics.min_response_time_ms, 10);
    }
}

//! Interval-driven detection of auth state written by other contexts.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::store::StoreCore;
use crate::config::PollingConfig;
use crate::error::AuthSyncError;
use crate::utils::now_ms;

/// Upper bound for a backed-off poll delay.
const MAX_POLL_DELAY_MS: u64 = 60_000;

/// Background task re-reading the shared store. Aborted when dropped.
pub(super) struct PollingWatcher {
    task: JoinHandle<()>,
    wake: Arc<Notify>,
}

impl PollingWatcher {
    pub(super) fn spawn(
        core: Arc<StoreCore>,
        config: PollingConfig,
    ) -> Result<Self, AuthSyncError> {
        let runtime = Handle::try_current().map_err(|err| {
            AuthSyncError::Environment(format!("polling requires a tokio runtime: {err}"))
        })?;
        let wake = Arc::new(Notify::new());
        let task = runtime.spawn(run(core, config, Arc::clone(&wake)));
        Ok(Self { task, wake })
    }

    /// Interrupts the current wait, including a watcher parked after repeated failures.
    pub(super) fn wake(&self) {
        self.wake.notify_one();
    }

    pub(super) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollingWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(core: Arc<StoreCore>, config: PollingConfig, wake: Arc<Notify>) {
    let mut failures: u32 = 0;
    loop {
        if failures > 0 && failures >= config.retry_attempts {
            log::warn!(
                "auth state watcher parked after {failures} consecutive read failures"
            );
            wake.notified().await;
            failures = 0;
        } else {
            tokio::select! {
                () = tokio::time::sleep(poll_delay(&config, failures)) => {}
                () = wake.notified() => {}
            }
        }

        match core.poll_at(now_ms()) {
            Ok(_) => failures = 0,
            Err(err) => {
                failures += 1;
                log::warn!(
                    "auth state poll failed ({failures}/{}): {err}",
                    config.retry_attempts
                );
            }
        }
    }
}

/// `interval * multiplier^failures`, capped at [`MAX_POLL_DELAY_MS`].
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub(super) fn poll_delay(config: &PollingConfig, failures: u32) -> Duration {
    let exponent = i32::try_from(failures).unwrap_or(i32::MAX);
    let delay = config.interval_ms as f64 * config.backoff_multiplier.powi(exponent);
    let delay = if delay.is_finite() {
        delay.min(MAX_POLL_DELAY_MS as f64) as u64
    } else {
        MAX_POLL_DELAY_MS
    };
    Duration::from_millis(delay.max(config.interval_ms.min(MAX_POLL_DELAY_MS)))
}

//! Bounded, insertion-ordered histories.

/// Interception layer test results kept.
pub(super) const MIDDLEWARE_HISTORY: usize = 10;
/// Sync errors kept.
pub(super) const SYNC_ERROR_HISTORY: usize = 5;
/// Duration samples kept per operation.
pub(super) const METRIC_SAMPLES: usize = 20;
/// Entries older than this are dropped by cleanup.
pub(super) const RETENTION_MS: u64 = 60 * 60 * 1_000;

/// Appends `item`, evicting the oldest entries beyond `cap`.
pub(super) fn push_bounded<T>(entries: &mut Vec<T>, item: T, cap: usize) {
    entries.push(item);
    truncate_oldest(entries, cap);
}

/// Drops the oldest entries beyond `cap`.
pub(super) fn truncate_oldest<T>(entries: &mut Vec<T>, cap: usize) {
    if entries.len() > cap {
        let excess = entries.len() - cap;
        entries.drain(..excess);
    }
}

/// Drops entries older than [`RETENTION_MS`] at `now`. Returns how many were removed.
pub(super) fn prune_expired<T>(
    entries: &mut Vec<T>,
    now: u64,
    timestamp: impl Fn(&T) -> u64,
) -> usize {
    let before = entries.len();
    entries.retain(|entry| now.saturating_sub(timestamp(entry)) <= RETENTION_MS);
    before - entries.len()
}

//! The time-keeper seam: a compare-and-swap store of schedule last-run times.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::BackendError;

/// Keeps the time each schedule last ran (that is, last enqueued its job).
///
/// This is the only coordination between concurrent scheduler processes:
/// whichever process wins [`TimeKeeper::attempt_to_keep_run_time`] for a
/// window enqueues the job, all others skip it.
#[async_trait]
pub trait TimeKeeper: Send + Sync {
    /// Returns the stored last-run time for `key`, or `None` if the schedule
    /// has never run.
    async fn last_ran_time(&self, key: &str) -> Result<Option<DateTime<Utc>>, BackendError>;

    /// Atomically records `run_time` as the last run of `key`.
    ///
    /// Succeeds and persists only when the stored value differs from
    /// `run_time` (or is absent); returns `false` without modifying storage
    /// when another process already recorded this run. Transient storage
    /// contention is reported as `false`, not as an error; a later tick
    /// simply retries.
    async fn attempt_to_keep_run_time(
        &self,
        key: &str,
        run_time: DateTime<Utc>,
    ) -> Result<bool, BackendError>;
}

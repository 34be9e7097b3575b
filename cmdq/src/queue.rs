//! The queue seam: durable storage of pending jobs with atomic-take dequeue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::job::Job;
use crate::BackendError;

/// Durable storage of pending jobs.
///
/// Implementations must guarantee the at-most-once take contract: when any
/// number of callers dequeue concurrently, no two of them may receive the
/// same stored record. A record only becomes visible to [`Queue::dequeue`]
/// once its `execute_at` time has passed.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Persists the job. `execute_at` of `None` makes it immediately
    /// eligible.
    async fn enqueue(
        &self,
        job: &Job,
        execute_at: Option<DateTime<Utc>>,
    ) -> Result<(), BackendError>;

    /// Takes one eligible job out of storage, or returns `None` when nothing
    /// is eligible.
    ///
    /// A record that cannot be decoded is an error, never a silent skip; see
    /// the backend's documentation for whether the record stays eligible or
    /// is quarantined.
    async fn dequeue(&self) -> Result<Option<Job>, BackendError>;
}

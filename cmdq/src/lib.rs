//! A job queue that runs jobs as supervised external processes.
//!
//! The crate is built around four seams, each of which has at least two
//! storage implementations:
//!
//! - [`queue::Queue`]: durable storage of pending jobs with atomic-take
//!   dequeue semantics.
//! - [`reporter::Reporter`]: a record of job lifecycle transitions
//!   (running, incremental output, finished/failed, retrying).
//! - [`timekeeper::TimeKeeper`]: a compare-and-swap store of last-run times
//!   used to let multiple scheduler processes share one set of periodic
//!   schedules without double-firing.
//! - [`retry::RetryScheduler`]: the policy computing when a failed job's
//!   retry should become eligible.
//!
//! The [`worker::Worker`] polls a queue, spawns each dequeued job as an
//! external process via a [`process::Spawner`], streams incremental output to
//! the reporter, and enqueues retries for failed jobs. The
//! [`scheduler::Scheduler`] polls a set of [`schedule::Schedule`]s and
//! enqueues a fresh job for each due schedule, at most once per interval
//! across all scheduler processes.
//!
//! Relational backends live in the `cmdq-sqlx` crate and Redis backends in
//! `cmdq-redis`; [`memory`] provides in-process implementations for tests.

pub mod config;
pub mod job;
pub mod memory;
pub mod process;
pub mod queue;
pub mod reporter;
pub mod retry;
pub mod schedule;
pub mod scheduler;
pub mod serializer;
pub mod testing;
pub mod timekeeper;
pub mod worker;

use thiserror::Error;

/// Errors produced by the job-lifecycle engine itself.
///
/// Storage backends report through [`BackendError`], which is carried here
/// via the `Backend` variant.
#[derive(Debug, Error)]
pub enum Error {
    /// [`job::Job::retry`] was called on a job whose retry budget is spent.
    ///
    /// Callers are expected to check [`job::Job::is_retryable`] first.
    #[error("this job cannot be retried any more")]
    NotRetryable,
    /// No executable is registered for the job's command name.
    #[error("no executable registered for command {0:?}")]
    CommandNotFound(String),
    /// The resolved executable could not be spawned.
    #[error("failed to spawn process for command {command:?}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    /// A run option was outside its valid range.
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Errors reported by queue, reporter, and time-keeper backends.
#[derive(Debug, Error)]
pub enum BackendError {
    /// A stored job record could not be encoded or decoded.
    #[error("error encoding or decoding a stored job")]
    EncodeDecode(#[from] serde_json::Error),
    /// A stored job record carried a field no job could have produced.
    #[error("malformed stored job: {0}")]
    Malformed(String),
    /// The backend's own storage layer failed.
    #[error("storage failure")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// An in-process backend's shared state was poisoned.
    #[error("backend in a bad state")]
    BadState,
}

pub mod prelude {
    //! Single import for the types most integrations need.
    pub use crate::config::{SchedulerConfig, WorkerConfig};
    pub use crate::job::{Job, JobId};
    pub use crate::process::{CommandMap, Spawner, SystemSpawner};
    pub use crate::queue::Queue;
    pub use crate::reporter::{LogReporter, NullReporter, Reporter, ReporterChain};
    pub use crate::retry::{FixedIntervalScheduler, RetryScheduler};
    pub use crate::schedule::{CronSchedule, EverySchedule, Schedule};
    pub use crate::scheduler::Scheduler;
    pub use crate::serializer::{JobSerializer, SerializedJob};
    pub use crate::timekeeper::TimeKeeper;
    pub use crate::worker::Worker;
    pub use crate::{BackendError, Error};
}

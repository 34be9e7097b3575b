//! The job entity and its retry transition.

use std::fmt::Display;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::retry::RetryScheduler;
use crate::Error;

/// The identity of a single enqueued job.
///
/// Ids are random 128-bit tokens compared by value. A retried job gets a
/// fresh id; ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl From<Uuid> for JobId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// A command to be executed by a worker, together with its retry budget.
///
/// A job is immutable once enqueued: the only way its stored form changes is
/// the retry transition, which produces a clone under a new identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    id: JobId,
    name: String,
    arguments: Vec<String>,
    max_retries: u32,
    retries: u32,
}

impl Job {
    /// Creates a job to run the command registered under `name` with the
    /// given arguments. `max_retries` is the ceiling of retries the job may
    /// consume; 0 means it is never retried.
    pub fn new(name: impl Into<String>, arguments: Vec<String>, max_retries: u32) -> Self {
        Self {
            id: JobId::new(),
            name: name.into(),
            arguments,
            max_retries,
            retries: 0,
        }
    }

    pub(crate) fn from_parts(
        id: JobId,
        name: String,
        arguments: Vec<String>,
        max_retries: u32,
        retries: u32,
    ) -> Self {
        Self {
            id,
            name,
            arguments,
            max_retries,
            retries,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// The number of retries this job has already consumed.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn is_retryable(&self) -> bool {
        self.retries < self.max_retries
    }

    /// Produces the retry clone of this job: a copy under a fresh [`JobId`]
    /// with one more retry consumed, along with the time the retry scheduler
    /// wants it to become eligible (`None` means immediately).
    ///
    /// Performs no I/O; the caller is responsible for enqueueing the clone.
    /// Fails with [`Error::NotRetryable`] when the retry budget is spent.
    pub fn retry(
        &self,
        scheduler: &dyn RetryScheduler,
    ) -> Result<(Job, Option<DateTime<Utc>>), Error> {
        if !self.is_retryable() {
            return Err(Error::NotRetryable);
        }
        let retry_job = Job {
            id: JobId::new(),
            retries: self.retries + 1,
            ..self.clone()
        };
        let execute_at = scheduler.schedule_next_retry(&retry_job, retry_job.retries);
        Ok((retry_job, execute_at))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::TimeDelta;

    use super::*;
    use crate::retry::FixedIntervalScheduler;

    struct Immediate;

    impl RetryScheduler for Immediate {
        fn schedule_next_retry(&self, _retry_job: &Job, _retried_count: u32) -> Option<DateTime<Utc>> {
            None
        }
    }

    #[test]
    fn retryable_iff_retries_below_max() {
        let job = Job::new("echo", vec![], 2);
        assert!(job.is_retryable());

        let (first, _) = job.retry(&Immediate).unwrap();
        assert!(first.is_retryable());

        let (second, _) = first.retry(&Immediate).unwrap();
        assert!(!second.is_retryable());
    }

    #[test]
    fn never_retryable_with_zero_budget() {
        let job = Job::new("echo", vec![], 0);
        assert!(!job.is_retryable());
        assert_matches!(job.retry(&Immediate), Err(Error::NotRetryable));
    }

    #[test]
    fn retry_increments_count_and_regenerates_identity() {
        let job = Job::new("echo", vec!["hello".to_owned()], 3);

        let mut seen = vec![job.id()];
        let mut current = job.clone();
        for expected_retries in 1..=3 {
            let (retry_job, _) = current.retry(&Immediate).unwrap();
            assert_eq!(retry_job.retries(), expected_retries);
            assert_eq!(retry_job.name(), job.name());
            assert_eq!(retry_job.arguments(), job.arguments());
            assert_eq!(retry_job.max_retries(), job.max_retries());
            assert!(!seen.contains(&retry_job.id()));
            seen.push(retry_job.id());
            current = retry_job;
        }
        assert_matches!(current.retry(&Immediate), Err(Error::NotRetryable));
    }

    #[test]
    fn retry_asks_the_scheduler_for_the_execute_time() {
        let job = Job::new("echo", vec![], 1);
        let before = Utc::now();

        let (_, execute_at) = job
            .retry(&FixedIntervalScheduler::new(TimeDelta::seconds(30)))
            .unwrap();

        let execute_at = execute_at.unwrap();
        assert!(execute_at >= before + TimeDelta::seconds(30));
        assert!(execute_at <= Utc::now() + TimeDelta::seconds(30));
    }
}

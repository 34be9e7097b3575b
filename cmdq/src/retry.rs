//! Retry timing policies.

use chrono::{DateTime, TimeDelta, Utc};

use crate::job::Job;

/// Computes when a retry clone should become eligible to run.
pub trait RetryScheduler: Send + Sync {
    /// Returns the time the given retry job should run at, or `None` when it
    /// should run immediately. `retried_count` is the number of retries the
    /// clone has consumed, starting at 1 for the first retry.
    fn schedule_next_retry(&self, retry_job: &Job, retried_count: u32) -> Option<DateTime<Utc>>;
}

/// Schedules every retry a fixed interval into the future.
#[derive(Debug, Clone, Copy)]
pub struct FixedIntervalScheduler {
    interval: TimeDelta,
}

impl FixedIntervalScheduler {
    pub fn new(interval: TimeDelta) -> Self {
        Self { interval }
    }
}

impl RetryScheduler for FixedIntervalScheduler {
    fn schedule_next_retry(&self, _retry_job: &Job, _retried_count: u32) -> Option<DateTime<Utc>> {
        Some(Utc::now() + self.interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedules_the_configured_interval_from_now() {
        let scheduler = FixedIntervalScheduler::new(TimeDelta::seconds(90));
        let job = Job::new("echo", vec![], 1);

        let before = Utc::now();
        let execute_at = scheduler.schedule_next_retry(&job, 1).unwrap();

        assert!(execute_at >= before + TimeDelta::seconds(90));
        assert!(execute_at <= Utc::now() + TimeDelta::seconds(90));
    }

    #[test]
    fn calls_are_independent_of_the_retry_count() {
        let scheduler = FixedIntervalScheduler::new(TimeDelta::seconds(10));
        let job = Job::new("echo", vec![], 5);

        let first = scheduler.schedule_next_retry(&job, 1).unwrap();
        let fifth = scheduler.schedule_next_retry(&job, 5).unwrap();

        assert!((fifth - first).abs() < TimeDelta::seconds(1));
    }
}

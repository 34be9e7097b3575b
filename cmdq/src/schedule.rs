//! Periodic schedule definitions evaluated by the scheduler loop.

use chrono::{DateTime, TimeDelta, Utc};

use crate::job::Job;

/// A periodic job definition.
///
/// Schedules hold no state beyond their configuration; due-ness is always a
/// function of the last-run time the scheduler passes in.
pub trait Schedule: Send + Sync {
    /// The stable identity of this schedule, used as the time-keeper key.
    /// Must be unique across every scheduler process sharing a time keeper.
    fn key(&self) -> &str;

    /// Whether the schedule is due given the time it last ran.
    fn should_run(&self, last_ran_at: DateTime<Utc>) -> bool;

    /// A freshly-created job for this firing. Every call returns a job with
    /// a new identity.
    fn job(&self) -> Job;
}

/// Fires once every fixed interval.
pub struct EverySchedule {
    key: String,
    interval: TimeDelta,
    name: String,
    arguments: Vec<String>,
    max_retries: u32,
}

impl EverySchedule {
    pub fn new(
        key: impl Into<String>,
        interval: TimeDelta,
        name: impl Into<String>,
        arguments: Vec<String>,
    ) -> Self {
        Self {
            key: key.into(),
            interval,
            name: name.into(),
            arguments,
            max_retries: 0,
        }
    }

    pub fn minutely(key: impl Into<String>, name: impl Into<String>, arguments: Vec<String>) -> Self {
        Self::new(key, TimeDelta::minutes(1), name, arguments)
    }

    pub fn hourly(key: impl Into<String>, name: impl Into<String>, arguments: Vec<String>) -> Self {
        Self::new(key, TimeDelta::hours(1), name, arguments)
    }

    pub fn daily(key: impl Into<String>, name: impl Into<String>, arguments: Vec<String>) -> Self {
        Self::new(key, TimeDelta::days(1), name, arguments)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

impl Schedule for EverySchedule {
    fn key(&self) -> &str {
        &self.key
    }

    fn should_run(&self, last_ran_at: DateTime<Utc>) -> bool {
        Utc::now() - last_ran_at >= self.interval
    }

    fn job(&self) -> Job {
        Job::new(self.name.clone(), self.arguments.clone(), self.max_retries)
    }
}

/// Fires per a cron expression: due whenever an occurrence lies between the
/// last run and now.
pub struct CronSchedule {
    key: String,
    schedule: cron::Schedule,
    name: String,
    arguments: Vec<String>,
    max_retries: u32,
}

impl CronSchedule {
    pub fn new(
        key: impl Into<String>,
        schedule: cron::Schedule,
        name: impl Into<String>,
        arguments: Vec<String>,
    ) -> Self {
        Self {
            key: key.into(),
            schedule,
            name: name.into(),
            arguments,
            max_retries: 0,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

impl Schedule for CronSchedule {
    fn key(&self) -> &str {
        &self.key
    }

    fn should_run(&self, last_ran_at: DateTime<Utc>) -> bool {
        self.schedule
            .after(&last_ran_at)
            .next()
            .is_some_and(|occurrence| occurrence <= Utc::now())
    }

    fn job(&self) -> Job {
        Job::new(self.name.clone(), self.arguments.clone(), self.max_retries)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn every_schedule_is_due_once_the_interval_elapses() {
        let schedule = EverySchedule::new("tick", TimeDelta::minutes(5), "echo", vec![]);

        assert!(!schedule.should_run(Utc::now()));
        assert!(!schedule.should_run(Utc::now() - TimeDelta::minutes(4)));
        assert!(schedule.should_run(Utc::now() - TimeDelta::minutes(5)));
        assert!(schedule.should_run(Utc::now() - TimeDelta::hours(2)));
    }

    #[test]
    fn every_schedule_creates_fresh_jobs() {
        let schedule = EverySchedule::hourly("tick", "echo", vec!["hi".to_owned()])
            .with_max_retries(2);

        let first = schedule.job();
        let second = schedule.job();

        assert_ne!(first.id(), second.id());
        assert_eq!(first.name(), "echo");
        assert_eq!(first.arguments(), ["hi".to_owned()]);
        assert_eq!(first.max_retries(), 2);
    }

    #[test]
    fn cron_schedule_is_due_when_an_occurrence_has_passed() {
        // Every second: always an occurrence between one minute ago and now.
        let every_second = cron::Schedule::from_str("* * * * * *").unwrap();
        let schedule = CronSchedule::new("tick", every_second, "echo", vec![]);
        assert!(schedule.should_run(Utc::now() - TimeDelta::minutes(1)));

        // Midnight on 2099-01-01: no occurrence has passed yet.
        let far_future = cron::Schedule::from_str("0 0 0 1 1 * 2099").unwrap();
        let schedule = CronSchedule::new("tick", far_future, "echo", vec![]);
        assert!(!schedule.should_run(Utc::now() - TimeDelta::days(365)));
    }
}

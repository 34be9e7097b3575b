//! Validated run options for the worker and scheduler loops.

use std::time::Duration;

use crate::Error;

const MAX_JOBS_MIN: u32 = 1;
const MAX_JOBS_MAX: u32 = 10;
const MAX_RUNTIME_MIN_SECS: u64 = 30;
const MAX_RUNTIME_MAX_SECS: u64 = 86_400;

/// Options for [`crate::worker::Worker`].
///
/// Invalid values fail at construction, before any loop starts or any
/// storage is touched.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub(crate) worker_name: String,
    pub(crate) max_jobs: usize,
    pub(crate) max_runtime: Duration,
    pub(crate) tick: Duration,
}

impl WorkerConfig {
    /// Defaults: 4 simultaneous jobs, 15 minutes maximum runtime, 500 ms
    /// tick.
    pub fn new(worker_name: impl Into<String>) -> Self {
        Self {
            worker_name: worker_name.into(),
            max_jobs: 4,
            max_runtime: Duration::from_secs(60 * 15),
            tick: Duration::from_millis(500),
        }
    }

    /// A config named after the current process: `worker-<pid>`.
    pub fn for_this_process() -> Self {
        Self::new(format!("worker-{}", std::process::id()))
    }

    /// The maximum number of simultaneously running jobs, between 1 and 10.
    pub fn with_max_jobs(mut self, max_jobs: u32) -> Result<Self, Error> {
        if !(MAX_JOBS_MIN..=MAX_JOBS_MAX).contains(&max_jobs) {
            return Err(Error::Config(format!(
                "max-jobs must be between {MAX_JOBS_MIN} and {MAX_JOBS_MAX}, got {max_jobs}"
            )));
        }
        self.max_jobs = max_jobs as usize;
        Ok(self)
    }

    /// The maximum runtime in seconds, between 30 and 86400. Once elapsed
    /// the worker drains and stops.
    pub fn with_max_runtime_secs(mut self, seconds: u64) -> Result<Self, Error> {
        self.max_runtime = validated_runtime(seconds)?;
        Ok(self)
    }

    /// The sleep between loop iterations. Not validated; tests use short
    /// ticks.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn worker_name(&self) -> &str {
        &self.worker_name
    }
}

/// Options for [`crate::scheduler::Scheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub(crate) max_runtime: Duration,
    pub(crate) tick: Duration,
}

impl SchedulerConfig {
    /// Defaults: 1 hour maximum runtime, 1 s tick.
    pub fn new() -> Self {
        Self {
            max_runtime: Duration::from_secs(60 * 60),
            tick: Duration::from_secs(1),
        }
    }

    /// The maximum runtime in seconds, between 30 and 86400.
    pub fn with_max_runtime_secs(mut self, seconds: u64) -> Result<Self, Error> {
        self.max_runtime = validated_runtime(seconds)?;
        Ok(self)
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn validated_runtime(seconds: u64) -> Result<Duration, Error> {
    if !(MAX_RUNTIME_MIN_SECS..=MAX_RUNTIME_MAX_SECS).contains(&seconds) {
        return Err(Error::Config(format!(
            "max-runtime must be between {MAX_RUNTIME_MIN_SECS} and {MAX_RUNTIME_MAX_SECS} seconds, got {seconds}"
        )));
    }
    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn max_jobs_is_bounded() {
        assert_matches!(
            WorkerConfig::new("w").with_max_jobs(0),
            Err(Error::Config(_))
        );
        assert_matches!(
            WorkerConfig::new("w").with_max_jobs(11),
            Err(Error::Config(_))
        );
        assert_eq!(WorkerConfig::new("w").with_max_jobs(10).unwrap().max_jobs, 10);
    }

    #[test]
    fn max_runtime_is_bounded() {
        assert_matches!(
            WorkerConfig::new("w").with_max_runtime_secs(29),
            Err(Error::Config(_))
        );
        assert_matches!(
            SchedulerConfig::new().with_max_runtime_secs(86_401),
            Err(Error::Config(_))
        );
        assert_eq!(
            SchedulerConfig::new()
                .with_max_runtime_secs(30)
                .unwrap()
                .max_runtime,
            Duration::from_secs(30)
        );
    }

    #[test]
    fn process_scoped_default_name() {
        let config = WorkerConfig::for_this_process();
        assert!(config.worker_name().starts_with("worker-"));
    }
}

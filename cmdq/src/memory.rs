//! In-memory backends, for tests and single-process use.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::job::Job;
use crate::queue::Queue;
use crate::timekeeper::TimeKeeper;
use crate::BackendError;

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, BackendError> {
    mutex.lock().map_err(|_| BackendError::BadState)
}

/// A queue backed by process memory. Cloning shares the underlying store.
#[derive(Clone, Default)]
pub struct InMemoryQueue {
    jobs: Arc<Mutex<Vec<(Job, DateTime<Utc>)>>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    async fn enqueue(
        &self,
        job: &Job,
        execute_at: Option<DateTime<Utc>>,
    ) -> Result<(), BackendError> {
        lock(&self.jobs)?.push((job.clone(), execute_at.unwrap_or_else(Utc::now)));
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Job>, BackendError> {
        let now = Utc::now();
        let mut jobs = lock(&self.jobs)?;
        let eligible = jobs
            .iter()
            .enumerate()
            .filter(|(_, (_, execute_at))| *execute_at <= now)
            .min_by_key(|(_, (_, execute_at))| *execute_at)
            .map(|(index, _)| index);
        Ok(eligible.map(|index| jobs.remove(index).0))
    }
}

/// A time keeper backed by process memory. Cloning shares the underlying
/// store, so clones contend with each other like separate processes sharing
/// a database would.
#[derive(Clone, Default)]
pub struct InMemoryTimeKeeper {
    times: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
}

impl InMemoryTimeKeeper {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TimeKeeper for InMemoryTimeKeeper {
    async fn last_ran_time(&self, key: &str) -> Result<Option<DateTime<Utc>>, BackendError> {
        Ok(lock(&self.times)?.get(key).copied())
    }

    async fn attempt_to_keep_run_time(
        &self,
        key: &str,
        run_time: DateTime<Utc>,
    ) -> Result<bool, BackendError> {
        let mut times = lock(&self.times)?;
        match times.get(key) {
            Some(stored) if *stored == run_time => Ok(false),
            _ => {
                times.insert(key.to_owned(), run_time);
                Ok(true)
            }
        }
    }
}

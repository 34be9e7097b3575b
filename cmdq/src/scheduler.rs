//! The periodic scheduler loop.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::queue::Queue;
use crate::schedule::Schedule;
use crate::timekeeper::TimeKeeper;

/// Enqueues jobs for due schedules, at most once per schedule per firing
/// across every scheduler process sharing the time keeper.
///
/// Coordination is a single compare-and-swap on the time keeper per firing:
/// the winner enqueues onto the schedule's target queue, losers advance
/// their local clock and move on. Neither path ever enqueues twice, so
/// schedulers can be run redundantly for availability.
pub struct Scheduler {
    time_keeper: Arc<dyn TimeKeeper>,
    schedules: Vec<TargetedSchedule>,
    config: SchedulerConfig,
}

struct TargetedSchedule {
    schedule: Box<dyn Schedule>,
    queue: Arc<dyn Queue>,
    last_ran_at: Option<DateTime<Utc>>,
}

impl Scheduler {
    pub fn new(time_keeper: Arc<dyn TimeKeeper>, config: SchedulerConfig) -> Self {
        Self {
            time_keeper,
            schedules: Vec::new(),
            config,
        }
    }

    /// Registers a schedule together with the queue its jobs land on.
    pub fn with_schedule(mut self, schedule: Box<dyn Schedule>, queue: Arc<dyn Queue>) -> Self {
        self.schedules.push(TargetedSchedule {
            schedule,
            queue,
            last_ran_at: None,
        });
        self
    }

    /// Runs until cancelled or until the configured maximum runtime elapses.
    pub async fn run(mut self, cancellation_token: CancellationToken) {
        let started_at = Instant::now();
        let start_time = Utc::now();

        for entry in &mut self.schedules {
            let last_ran_at = match self.time_keeper.last_ran_time(entry.schedule.key()).await {
                Ok(Some(stored)) => stored,
                Ok(None) => start_time,
                Err(err) => {
                    tracing::error!(?err, key = entry.schedule.key(), "failed to load the last run time, assuming now: {err}");
                    start_time
                }
            };
            entry.last_ran_at = Some(last_ran_at);
        }
        tracing::info!(schedules = self.schedules.len(), "scheduler started");

        loop {
            if cancellation_token.is_cancelled() {
                tracing::info!("scheduler stopping: cancelled");
                break;
            }
            if started_at.elapsed() >= self.config.max_runtime {
                tracing::info!("scheduler stopping: maximum runtime elapsed");
                break;
            }

            for index in 0..self.schedules.len() {
                let due = {
                    let entry = &self.schedules[index];
                    entry
                        .last_ran_at
                        .is_some_and(|last_ran_at| entry.schedule.should_run(last_ran_at))
                };
                if due {
                    Self::fire(&*self.time_keeper, &mut self.schedules[index]).await;
                }
            }

            tokio::select! {
                () = cancellation_token.cancelled() => {}
                () = tokio::time::sleep(self.config.tick) => {}
            }
        }
    }

    async fn fire(time_keeper: &dyn TimeKeeper, entry: &mut TargetedSchedule) {
        // Whole-second granularity so that racing processes within the same
        // window propose the same value and exactly one swap succeeds.
        let run_time = second_truncated(Utc::now());
        let key = entry.schedule.key();
        match time_keeper.attempt_to_keep_run_time(key, run_time).await {
            Ok(true) => {
                let job = entry.schedule.job();
                match entry.queue.enqueue(&job, None).await {
                    Ok(()) => {
                        tracing::info!(key, job_id = %job.id(), "schedule fired");
                    }
                    Err(err) => {
                        tracing::error!(?err, key, "failed to enqueue the scheduled job: {err}");
                    }
                }
            }
            Ok(false) => {
                tracing::debug!(key, "another scheduler kept this run");
            }
            Err(err) => {
                tracing::error!(?err, key, "failed to keep the run time: {err}");
                return;
            }
        }
        // Advance even when another process won, otherwise this process
        // would retry the same window every tick.
        entry.last_ran_at = Some(run_time);
    }
}

fn second_truncated(time: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(time.timestamp(), 0).unwrap_or(time)
}

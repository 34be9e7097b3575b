//! The worker loop: dequeue, spawn, supervise, report, retry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::job::Job;
use crate::process::{ProcessHandle, Spawner};
use crate::queue::Queue;
use crate::reporter::Reporter;
use crate::retry::RetryScheduler;

/// Reported as the exit code of a job whose process could not be spawned.
const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

/// Runs queued jobs as supervised processes.
///
/// Each loop iteration first sweeps the running set, draining incremental
/// output and finalizing terminated processes, then dequeues at most one job
/// if a slot is free. Once cancelled or past its maximum runtime the worker
/// drains: it stops dequeuing, lets in-flight processes finish, and returns.
pub struct Worker {
    queue: Arc<dyn Queue>,
    reporter: Arc<dyn Reporter>,
    spawner: Arc<dyn Spawner>,
    retry_scheduler: Arc<dyn RetryScheduler>,
    config: WorkerConfig,
    running: HashMap<u64, RunningJob>,
    next_slot: u64,
}

struct RunningJob {
    job: Job,
    process: ProcessHandle,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn Queue>,
        reporter: Arc<dyn Reporter>,
        spawner: Arc<dyn Spawner>,
        retry_scheduler: Arc<dyn RetryScheduler>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            reporter,
            spawner,
            retry_scheduler,
            config,
            running: HashMap::new(),
            next_slot: 0,
        }
    }

    /// Runs until cancelled or until the configured maximum runtime elapses,
    /// then drains the in-flight jobs before returning.
    pub async fn run(mut self, cancellation_token: CancellationToken) {
        let started_at = Instant::now();
        tracing::info!(
            worker = %self.config.worker_name,
            max_jobs = self.config.max_jobs,
            "worker started"
        );

        loop {
            self.sweep_running_jobs().await;

            let draining = cancellation_token.is_cancelled()
                || started_at.elapsed() >= self.config.max_runtime;
            if draining {
                if self.running.is_empty() {
                    break;
                }
            } else if self.running.len() < self.config.max_jobs {
                match self.queue.dequeue().await {
                    Ok(Some(job)) => self.start_job(job).await,
                    Ok(None) => {}
                    Err(err) => {
                        tracing::error!(?err, "failed to dequeue: {err}");
                    }
                }
            }

            tokio::select! {
                () = cancellation_token.cancelled(), if !draining => {}
                () = tokio::time::sleep(self.config.tick) => {}
            }
        }
        tracing::info!(worker = %self.config.worker_name, "worker stopped");
    }

    async fn sweep_running_jobs(&mut self) {
        let slots: Vec<u64> = self.running.keys().copied().collect();
        for slot in slots {
            let exit = match self.running.get_mut(&slot) {
                Some(running) => running.process.try_exit_code(),
                None => continue,
            };
            match exit {
                Ok(None) => {
                    if let Some(running) = self.running.get(&slot) {
                        let (stdout, stderr) = running.process.drain_output();
                        if !stdout.is_empty() || !stderr.is_empty() {
                            let _ = self
                                .reporter
                                .update_job_output(running.job.id(), &stdout, &stderr)
                                .await
                                .inspect_err(|err| {
                                    tracing::error!(?err, job_id = %running.job.id(), "failed to report job output: {err}");
                                });
                        }
                    }
                }
                Ok(Some(exit_code)) => {
                    if let Some(mut running) = self.running.remove(&slot) {
                        running.process.wait_output().await;
                        let (stdout, stderr) = running.process.drain_output();
                        self.finalize_job(&running.job, exit_code, &stdout, &stderr)
                            .await;
                    }
                }
                Err(err) => {
                    tracing::error!(?err, "lost track of a job process: {err}");
                    if let Some(mut running) = self.running.remove(&slot) {
                        running.process.wait_output().await;
                        let (stdout, stderr) = running.process.drain_output();
                        self.finalize_job(&running.job, -1, &stdout, &stderr).await;
                    }
                }
            }
        }
    }

    async fn start_job(&mut self, job: Job) {
        match self.spawner.spawn(&job) {
            Ok(process) => {
                let _ = self
                    .reporter
                    .report_job_running(&job, &self.config.worker_name, process.pid())
                    .await
                    .inspect_err(|err| {
                        tracing::error!(?err, job_id = %job.id(), "failed to report the running state: {err}");
                    });
                let slot = self.next_slot;
                self.next_slot += 1;
                self.running.insert(slot, RunningJob { job, process });
            }
            Err(err) => {
                // The job never enters the running set and is not retried;
                // an unspawnable command would fail again identically.
                tracing::error!(?err, job_id = %job.id(), "failed to spawn: {err}");
                let _ = self
                    .reporter
                    .report_job_running(&job, &self.config.worker_name, 0)
                    .await;
                let _ = self
                    .reporter
                    .report_job_finished(
                        job.id(),
                        SPAWN_FAILURE_EXIT_CODE,
                        "",
                        &err.to_string(),
                    )
                    .await
                    .inspect_err(|err| {
                        tracing::error!(?err, job_id = %job.id(), "failed to report the spawn failure: {err}");
                    });
            }
        }
    }

    async fn finalize_job(&self, job: &Job, exit_code: i32, stdout: &str, stderr: &str) {
        let _ = self
            .reporter
            .report_job_finished(job.id(), exit_code, stdout, stderr)
            .await
            .inspect_err(|err| {
                tracing::error!(?err, job_id = %job.id(), "failed to report the terminal state: {err}");
            });

        if exit_code == 0 || !job.is_retryable() {
            return;
        }
        let Ok((retry_job, execute_at)) = job.retry(self.retry_scheduler.as_ref()) else {
            return;
        };
        match self.queue.enqueue(&retry_job, execute_at).await {
            Ok(()) => {
                let _ = self
                    .reporter
                    .report_job_retrying(job.id(), retry_job.id())
                    .await
                    .inspect_err(|err| {
                        tracing::error!(?err, job_id = %job.id(), "failed to report the retry link: {err}");
                    });
            }
            Err(err) => {
                tracing::error!(?err, job_id = %job.id(), "failed to enqueue the retry: {err}");
            }
        }
    }
}

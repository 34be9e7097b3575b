//! The reporter seam and its in-process combinators.

use async_trait::async_trait;

use crate::job::{Job, JobId};
use crate::BackendError;

/// Records job lifecycle transitions.
///
/// Callers never consult the result for control flow; a reporter failure must
/// not keep a job from running or retrying.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Records that a worker has started the job's process. Always the first
    /// call for a given job id.
    async fn report_job_running(
        &self,
        job: &Job,
        worker_name: &str,
        pid: u32,
    ) -> Result<(), BackendError>;

    /// Appends incremental output to the job's record. Both deltas may be
    /// empty, in which case implementations are free to skip the write.
    async fn update_job_output(
        &self,
        job_id: JobId,
        stdout: &str,
        stderr: &str,
    ) -> Result<(), BackendError>;

    /// Appends the remaining output and sets the terminal state: `finished`
    /// when `exit_code` is 0, `failed` otherwise. Called exactly once per
    /// job lifecycle.
    async fn report_job_finished(
        &self,
        job_id: JobId,
        exit_code: i32,
        stdout: &str,
        stderr: &str,
    ) -> Result<(), BackendError>;

    /// Records the forward link from a failed job to its retry clone. Called
    /// only after [`Reporter::report_job_finished`] for the same job.
    async fn report_job_retrying(
        &self,
        job_id: JobId,
        retry_job_id: JobId,
    ) -> Result<(), BackendError>;
}

/// Forwards every call to an ordered sequence of reporters.
///
/// Member failures are isolated: a failing member is logged and the remaining
/// members still receive the call, so one broken backend never blinds the
/// others.
pub struct ReporterChain {
    reporters: Vec<Box<dyn Reporter>>,
}

impl ReporterChain {
    pub fn new(reporters: Vec<Box<dyn Reporter>>) -> Self {
        Self { reporters }
    }
}

#[async_trait]
impl Reporter for ReporterChain {
    async fn report_job_running(
        &self,
        job: &Job,
        worker_name: &str,
        pid: u32,
    ) -> Result<(), BackendError> {
        for reporter in &self.reporters {
            let _ = reporter
                .report_job_running(job, worker_name, pid)
                .await
                .inspect_err(|err| {
                    tracing::error!(?err, job_id = %job.id(), "chained reporter failed to record the running state: {err}");
                });
        }
        Ok(())
    }

    async fn update_job_output(
        &self,
        job_id: JobId,
        stdout: &str,
        stderr: &str,
    ) -> Result<(), BackendError> {
        for reporter in &self.reporters {
            let _ = reporter
                .update_job_output(job_id, stdout, stderr)
                .await
                .inspect_err(|err| {
                    tracing::error!(?err, %job_id, "chained reporter failed to record job output: {err}");
                });
        }
        Ok(())
    }

    async fn report_job_finished(
        &self,
        job_id: JobId,
        exit_code: i32,
        stdout: &str,
        stderr: &str,
    ) -> Result<(), BackendError> {
        for reporter in &self.reporters {
            let _ = reporter
                .report_job_finished(job_id, exit_code, stdout, stderr)
                .await
                .inspect_err(|err| {
                    tracing::error!(?err, %job_id, "chained reporter failed to record the terminal state: {err}");
                });
        }
        Ok(())
    }

    async fn report_job_retrying(
        &self,
        job_id: JobId,
        retry_job_id: JobId,
    ) -> Result<(), BackendError> {
        for reporter in &self.reporters {
            let _ = reporter
                .report_job_retrying(job_id, retry_job_id)
                .await
                .inspect_err(|err| {
                    tracing::error!(?err, %job_id, "chained reporter failed to record the retry link: {err}");
                });
        }
        Ok(())
    }
}

/// Emits every transition through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl LogReporter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Reporter for LogReporter {
    async fn report_job_running(
        &self,
        job: &Job,
        worker_name: &str,
        pid: u32,
    ) -> Result<(), BackendError> {
        tracing::info!(job_id = %job.id(), worker = worker_name, pid, "{} START", job.name());
        Ok(())
    }

    async fn update_job_output(
        &self,
        job_id: JobId,
        stdout: &str,
        stderr: &str,
    ) -> Result<(), BackendError> {
        if !stdout.is_empty() {
            tracing::debug!(%job_id, "OUT > {}", stdout.trim_end());
        }
        if !stderr.is_empty() {
            tracing::debug!(%job_id, "ERR > {}", stderr.trim_end());
        }
        Ok(())
    }

    async fn report_job_finished(
        &self,
        job_id: JobId,
        exit_code: i32,
        stdout: &str,
        stderr: &str,
    ) -> Result<(), BackendError> {
        self.update_job_output(job_id, stdout, stderr).await?;
        if exit_code == 0 {
            tracing::info!(%job_id, "FINISHED");
        } else {
            tracing::warn!(%job_id, exit_code, "FAILED");
        }
        Ok(())
    }

    async fn report_job_retrying(
        &self,
        job_id: JobId,
        retry_job_id: JobId,
    ) -> Result<(), BackendError> {
        tracing::info!(%job_id, %retry_job_id, "RETRYING");
        Ok(())
    }
}

/// Discards every report.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl NullReporter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Reporter for NullReporter {
    async fn report_job_running(
        &self,
        _job: &Job,
        _worker_name: &str,
        _pid: u32,
    ) -> Result<(), BackendError> {
        Ok(())
    }

    async fn update_job_output(
        &self,
        _job_id: JobId,
        _stdout: &str,
        _stderr: &str,
    ) -> Result<(), BackendError> {
        Ok(())
    }

    async fn report_job_finished(
        &self,
        _job_id: JobId,
        _exit_code: i32,
        _stdout: &str,
        _stderr: &str,
    ) -> Result<(), BackendError> {
        Ok(())
    }

    async fn report_job_retrying(
        &self,
        _job_id: JobId,
        _retry_job_id: JobId,
    ) -> Result<(), BackendError> {
        Ok(())
    }
}

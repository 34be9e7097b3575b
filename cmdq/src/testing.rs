//! Test doubles shared by the crate's own tests and by backend crates.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::job::{Job, JobId};
use crate::reporter::Reporter;
use crate::BackendError;

/// A lifecycle transition observed by a [`RecordingReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportedEvent {
    Running {
        job_id: JobId,
        worker_name: String,
        pid: u32,
    },
    Output {
        job_id: JobId,
        stdout: String,
        stderr: String,
    },
    Finished {
        job_id: JobId,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
    Retrying {
        job_id: JobId,
        retry_job_id: JobId,
    },
}

/// Records every report in order. Cloning shares the recorded events.
#[derive(Clone, Default)]
pub struct RecordingReporter {
    events: Arc<Mutex<Vec<ReportedEvent>>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ReportedEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    fn record(&self, event: ReportedEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[async_trait]
impl Reporter for RecordingReporter {
    async fn report_job_running(
        &self,
        job: &Job,
        worker_name: &str,
        pid: u32,
    ) -> Result<(), BackendError> {
        self.record(ReportedEvent::Running {
            job_id: job.id(),
            worker_name: worker_name.to_owned(),
            pid,
        });
        Ok(())
    }

    async fn update_job_output(
        &self,
        job_id: JobId,
        stdout: &str,
        stderr: &str,
    ) -> Result<(), BackendError> {
        self.record(ReportedEvent::Output {
            job_id,
            stdout: stdout.to_owned(),
            stderr: stderr.to_owned(),
        });
        Ok(())
    }

    async fn report_job_finished(
        &self,
        job_id: JobId,
        exit_code: i32,
        stdout: &str,
        stderr: &str,
    ) -> Result<(), BackendError> {
        self.record(ReportedEvent::Finished {
            job_id,
            exit_code,
            stdout: stdout.to_owned(),
            stderr: stderr.to_owned(),
        });
        Ok(())
    }

    async fn report_job_retrying(
        &self,
        job_id: JobId,
        retry_job_id: JobId,
    ) -> Result<(), BackendError> {
        self.record(ReportedEvent::Retrying { job_id, retry_job_id });
        Ok(())
    }
}

/// Fails every report.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingReporter;

#[async_trait]
impl Reporter for FailingReporter {
    async fn report_job_running(
        &self,
        _job: &Job,
        _worker_name: &str,
        _pid: u32,
    ) -> Result<(), BackendError> {
        Err(BackendError::BadState)
    }

    async fn update_job_output(
        &self,
        _job_id: JobId,
        _stdout: &str,
        _stderr: &str,
    ) -> Result<(), BackendError> {
        Err(BackendError::BadState)
    }

    async fn report_job_finished(
        &self,
        _job_id: JobId,
        _exit_code: i32,
        _stdout: &str,
        _stderr: &str,
    ) -> Result<(), BackendError> {
        Err(BackendError::BadState)
    }

    async fn report_job_retrying(
        &self,
        _job_id: JobId,
        _retry_job_id: JobId,
    ) -> Result<(), BackendError> {
        Err(BackendError::BadState)
    }
}

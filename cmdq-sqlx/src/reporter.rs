//! The Postgres-backed lifecycle reporter.

use async_trait::async_trait;
use chrono::Utc;
use cmdq::job::{Job, JobId};
use cmdq::reporter::Reporter;
use cmdq::BackendError;
use sqlx::PgPool;

use crate::schema::{ident, ReporterSchema};
use crate::storage;

const STATE_RUNNING: &str = "running";
const STATE_FINISHED: &str = "finished";
const STATE_FAILED: &str = "failed";

/// Keeps one row per job execution: its state, accumulated output, exit
/// code, and (for failed jobs that were retried) the id of the retry clone.
///
/// Output updates append to the stored text, so the row always holds
/// everything the process has written so far.
#[derive(Clone)]
pub struct PgReporter {
    pool: PgPool,
    schema: ReporterSchema,
}

impl PgReporter {
    pub fn new(pool: PgPool) -> Self {
        Self::with_schema(pool, ReporterSchema::default())
    }

    pub fn with_schema(pool: PgPool, schema: ReporterSchema) -> Self {
        Self { pool, schema }
    }

    fn insert_sql(&self) -> String {
        let s = &self.schema;
        format!(
            "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}) \
             VALUES ($1, $2, $3, '', '', $4, $5, $6)",
            ident(&s.table),
            ident(&s.job_id),
            ident(&s.name),
            ident(&s.state),
            ident(&s.stdout),
            ident(&s.stderr),
            ident(&s.worker_name),
            ident(&s.pid),
            ident(&s.started_at),
        )
    }

    fn append_output_sql(&self) -> String {
        let s = &self.schema;
        format!(
            "UPDATE {table} SET {stdout} = {stdout} || $2, {stderr} = {stderr} || $3 \
             WHERE {job_id} = $1",
            table = ident(&s.table),
            stdout = ident(&s.stdout),
            stderr = ident(&s.stderr),
            job_id = ident(&s.job_id),
        )
    }

    fn finish_sql(&self) -> String {
        let s = &self.schema;
        format!(
            "UPDATE {table} SET {stdout} = {stdout} || $2, {stderr} = {stderr} || $3, \
             {exit_code} = $4, {state} = $5, {finished_at} = $6 WHERE {job_id} = $1",
            table = ident(&s.table),
            stdout = ident(&s.stdout),
            stderr = ident(&s.stderr),
            exit_code = ident(&s.exit_code),
            state = ident(&s.state),
            finished_at = ident(&s.finished_at),
            job_id = ident(&s.job_id),
        )
    }

    fn retry_to_sql(&self) -> String {
        let s = &self.schema;
        format!(
            "UPDATE {} SET {} = $2 WHERE {} = $1",
            ident(&s.table),
            ident(&s.retry_to),
            ident(&s.job_id),
        )
    }
}

#[async_trait]
impl Reporter for PgReporter {
    async fn report_job_running(
        &self,
        job: &Job,
        worker_name: &str,
        pid: u32,
    ) -> Result<(), BackendError> {
        sqlx::query(&self.insert_sql())
            .bind(job.id().to_string())
            .bind(job.name())
            .bind(STATE_RUNNING)
            .bind(worker_name)
            .bind(pid as i64)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn update_job_output(
        &self,
        job_id: JobId,
        stdout: &str,
        stderr: &str,
    ) -> Result<(), BackendError> {
        if stdout.is_empty() && stderr.is_empty() {
            return Ok(());
        }
        sqlx::query(&self.append_output_sql())
            .bind(job_id.to_string())
            .bind(stdout)
            .bind(stderr)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn report_job_finished(
        &self,
        job_id: JobId,
        exit_code: i32,
        stdout: &str,
        stderr: &str,
    ) -> Result<(), BackendError> {
        let state = if exit_code == 0 {
            STATE_FINISHED
        } else {
            STATE_FAILED
        };
        sqlx::query(&self.finish_sql())
            .bind(job_id.to_string())
            .bind(stdout)
            .bind(stderr)
            .bind(exit_code)
            .bind(state)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn report_job_retrying(
        &self,
        job_id: JobId,
        retry_job_id: JobId,
    ) -> Result<(), BackendError> {
        sqlx::query(&self.retry_to_sql())
            .bind(job_id.to_string())
            .bind(retry_job_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }
}

//! Table and column naming for the Postgres backends.
//!
//! Every schema struct has public fields, so deployments with existing
//! tables override just the names that differ:
//!
//! ```
//! use cmdq_sqlx::QueueSchema;
//!
//! let schema = QueueSchema {
//!     table: "pending_commands".to_owned(),
//!     ..Default::default()
//! };
//! ```

/// Quotes a SQL identifier, escaping embedded double quotes.
pub(crate) fn ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// The table [`crate::PgQueue`] stores pending jobs in.
#[derive(Debug, Clone)]
pub struct QueueSchema {
    pub table: String,
    pub id: String,
    pub name: String,
    pub arguments: String,
    pub max_retries: String,
    pub retries: String,
    pub execute_at: String,
}

impl Default for QueueSchema {
    fn default() -> Self {
        Self {
            table: "jobs".to_owned(),
            id: "id".to_owned(),
            name: "name".to_owned(),
            arguments: "arguments".to_owned(),
            max_retries: "max_retries".to_owned(),
            retries: "retries".to_owned(),
            execute_at: "execute_at".to_owned(),
        }
    }
}

/// The table [`crate::PgReporter`] keeps job lifecycle records in.
#[derive(Debug, Clone)]
pub struct ReporterSchema {
    pub table: String,
    pub job_id: String,
    pub name: String,
    pub state: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: String,
    pub worker_name: String,
    pub pid: String,
    pub retry_to: String,
    pub started_at: String,
    pub finished_at: String,
}

impl Default for ReporterSchema {
    fn default() -> Self {
        Self {
            table: "job_reports".to_owned(),
            job_id: "job_id".to_owned(),
            name: "name".to_owned(),
            state: "state".to_owned(),
            stdout: "stdout".to_owned(),
            stderr: "stderr".to_owned(),
            exit_code: "exit_code".to_owned(),
            worker_name: "worker_name".to_owned(),
            pid: "pid".to_owned(),
            retry_to: "retry_to".to_owned(),
            started_at: "started_at".to_owned(),
            finished_at: "finished_at".to_owned(),
        }
    }
}

/// The table [`crate::PgTimeKeeper`] keeps schedule last-run times in.
#[derive(Debug, Clone)]
pub struct ScheduleSchema {
    pub table: String,
    pub key: String,
    pub last_ran_at: String,
}

impl Default for ScheduleSchema {
    fn default() -> Self {
        Self {
            table: "job_schedules".to_owned(),
            key: "key".to_owned(),
            last_ran_at: "last_ran_at".to_owned(),
        }
    }
}

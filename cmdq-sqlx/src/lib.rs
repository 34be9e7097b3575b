//! Postgres implementations of cmdq's storage seams.
//!
//! [`PgQueue`] stores pending jobs, [`PgReporter`] keeps a per-job lifecycle
//! record, and [`PgTimeKeeper`] provides the compare-and-swap last-run store
//! the scheduler coordinates through. Each takes a [`sqlx::PgPool`] and an
//! optional schema describing the table it reads and writes, so several
//! queues can share one database.
//!
//! [`migrate`] creates the tables for the default schemas. Deployments using
//! custom table names manage their own DDL.

use cmdq::BackendError;

mod queue;
mod reporter;
mod schema;
mod timekeeper;

pub use queue::PgQueue;
pub use reporter::PgReporter;
pub use schema::{QueueSchema, ReporterSchema, ScheduleSchema};
pub use timekeeper::PgTimeKeeper;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Creates the tables used by the default schemas.
pub async fn migrate(pool: &sqlx::PgPool) -> Result<(), BackendError> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|err| BackendError::Storage(Box::new(err)))
}

pub(crate) fn storage(err: sqlx::Error) -> BackendError {
    BackendError::Storage(Box::new(err))
}

/// Whether the error is transient lock or serialization contention: another
/// process holds the row and the current attempt should simply be dropped.
pub(crate) fn is_contention(err: &sqlx::Error) -> bool {
    matches!(
        err.as_database_error().and_then(|db| db.code()).as_deref(),
        // serialization_failure, deadlock_detected, lock_not_available
        Some("40001" | "40P01" | "55P03")
    )
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err.as_database_error().and_then(|db| db.code()).as_deref(),
        Some("23505")
    )
}

//! The Postgres-backed last-run time store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cmdq::timekeeper::TimeKeeper;
use cmdq::BackendError;
use sqlx::{PgPool, Row};

use crate::schema::{ident, ScheduleSchema};
use crate::{is_contention, is_unique_violation, storage};

/// Keeps one row per schedule key, updated with set-if-changed semantics.
///
/// The keyed row is locked with `FOR UPDATE NOWAIT`, so when two processes
/// attempt the same window at once one of them sees a lock error and reports
/// the attempt as lost rather than blocking. A locked read observing the
/// proposed value already stored also reports the attempt as lost, since an
/// unconditional update would "succeed" without changing anything.
#[derive(Clone)]
pub struct PgTimeKeeper {
    pool: PgPool,
    schema: ScheduleSchema,
}

impl PgTimeKeeper {
    pub fn new(pool: PgPool) -> Self {
        Self::with_schema(pool, ScheduleSchema::default())
    }

    pub fn with_schema(pool: PgPool, schema: ScheduleSchema) -> Self {
        Self { pool, schema }
    }

    fn read_sql(&self) -> String {
        let s = &self.schema;
        format!(
            "SELECT {} AS last_ran_at FROM {} WHERE {} = $1",
            ident(&s.last_ran_at),
            ident(&s.table),
            ident(&s.key),
        )
    }

    fn locked_read_sql(&self) -> String {
        format!("{} FOR UPDATE NOWAIT", self.read_sql())
    }

    fn insert_sql(&self) -> String {
        let s = &self.schema;
        format!(
            "INSERT INTO {} ({}, {}) VALUES ($1, $2)",
            ident(&s.table),
            ident(&s.key),
            ident(&s.last_ran_at),
        )
    }

    fn update_sql(&self) -> String {
        let s = &self.schema;
        format!(
            "UPDATE {} SET {} = $2 WHERE {} = $1",
            ident(&s.table),
            ident(&s.last_ran_at),
            ident(&s.key),
        )
    }
}

#[async_trait]
impl TimeKeeper for PgTimeKeeper {
    async fn last_ran_time(&self, key: &str) -> Result<Option<DateTime<Utc>>, BackendError> {
        let row = sqlx::query(&self.read_sql())
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.map(|row| row.try_get("last_ran_at").map_err(storage))
            .transpose()
    }

    async fn attempt_to_keep_run_time(
        &self,
        key: &str,
        run_time: DateTime<Utc>,
    ) -> Result<bool, BackendError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let observed = match sqlx::query(&self.locked_read_sql())
            .bind(key)
            .fetch_optional(&mut *tx)
            .await
        {
            Ok(row) => row
                .map(|row| row.try_get::<DateTime<Utc>, _>("last_ran_at"))
                .transpose()
                .map_err(storage)?,
            Err(err) if is_contention(&err) => return Ok(false),
            Err(err) => return Err(storage(err)),
        };

        match observed {
            Some(stored) if stored == run_time => Ok(false),
            Some(_) => {
                sqlx::query(&self.update_sql())
                    .bind(key)
                    .bind(run_time)
                    .execute(&mut *tx)
                    .await
                    .map_err(storage)?;
                tx.commit().await.map_err(storage)?;
                Ok(true)
            }
            None => {
                match sqlx::query(&self.insert_sql())
                    .bind(key)
                    .bind(run_time)
                    .execute(&mut *tx)
                    .await
                {
                    Ok(_) => {
                        tx.commit().await.map_err(storage)?;
                        Ok(true)
                    }
                    // Another process inserted the first row for this key.
                    Err(err) if is_unique_violation(&err) || is_contention(&err) => Ok(false),
                    Err(err) => Err(storage(err)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keeper(schema: ScheduleSchema) -> PgTimeKeeper {
        PgTimeKeeper::with_schema(
            PgPool::connect_lazy("postgres://localhost/unused").unwrap(),
            schema,
        )
    }

    #[tokio::test]
    async fn sql_targets_the_configured_names() {
        let keeper = keeper(ScheduleSchema {
            table: "my_schedules".to_owned(),
            last_ran_at: "ran_at".to_owned(),
            ..Default::default()
        });
        assert!(keeper.read_sql().contains("FROM \"my_schedules\""));
        assert!(keeper.read_sql().contains("\"ran_at\" AS last_ran_at"));
        assert!(keeper.insert_sql().starts_with("INSERT INTO \"my_schedules\""));
        assert!(keeper.update_sql().starts_with("UPDATE \"my_schedules\""));
    }

    #[tokio::test]
    async fn the_reserved_key_column_is_quoted() {
        assert!(keeper(ScheduleSchema::default())
            .insert_sql()
            .contains("(\"key\", \"last_ran_at\")"));
    }

    #[tokio::test]
    async fn the_locked_read_does_not_wait() {
        assert!(keeper(ScheduleSchema::default())
            .locked_read_sql()
            .ends_with("FOR UPDATE NOWAIT"));
    }
}

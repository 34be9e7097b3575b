//! The Postgres-backed queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cmdq::job::Job;
use cmdq::queue::Queue;
use cmdq::serializer::{JobSerializer, SerializedJob};
use cmdq::BackendError;
use sqlx::{PgPool, Row};

use crate::schema::{ident, QueueSchema};
use crate::storage;

/// Stores pending jobs in a Postgres table.
///
/// Dequeue locks one due row, decodes it, and deletes it in a single
/// transaction, so a job is only ever handed to one worker and stays queued
/// if the worker dies before commit. An undecodable row is left in place
/// (the transaction rolls back) and surfaced as an error.
#[derive(Clone)]
pub struct PgQueue {
    pool: PgPool,
    schema: QueueSchema,
    serializer: JobSerializer,
}

impl PgQueue {
    pub fn new(pool: PgPool) -> Self {
        Self::with_schema(pool, QueueSchema::default())
    }

    pub fn with_schema(pool: PgPool, schema: QueueSchema) -> Self {
        Self {
            pool,
            schema,
            serializer: JobSerializer::new(),
        }
    }

    fn enqueue_sql(&self) -> String {
        let s = &self.schema;
        format!(
            "INSERT INTO {} ({}, {}, {}, {}, {}, {}) VALUES ($1, $2, $3, $4, $5, $6)",
            ident(&s.table),
            ident(&s.id),
            ident(&s.name),
            ident(&s.arguments),
            ident(&s.max_retries),
            ident(&s.retries),
            ident(&s.execute_at),
        )
    }

    fn select_sql(&self) -> String {
        let s = &self.schema;
        format!(
            "SELECT {id} AS id, {name} AS name, {arguments} AS arguments, \
             {max_retries} AS max_retries, {retries} AS retries FROM {table} \
             WHERE {execute_at} <= $1 ORDER BY {execute_at} LIMIT 1 FOR UPDATE",
            table = ident(&s.table),
            id = ident(&s.id),
            name = ident(&s.name),
            arguments = ident(&s.arguments),
            max_retries = ident(&s.max_retries),
            retries = ident(&s.retries),
            execute_at = ident(&s.execute_at),
        )
    }

    fn delete_sql(&self) -> String {
        format!(
            "DELETE FROM {} WHERE {} = $1",
            ident(&self.schema.table),
            ident(&self.schema.id)
        )
    }
}

#[async_trait]
impl Queue for PgQueue {
    async fn enqueue(
        &self,
        job: &Job,
        execute_at: Option<DateTime<Utc>>,
    ) -> Result<(), BackendError> {
        let record = self.serializer.serialize(job)?;
        sqlx::query(&self.enqueue_sql())
            .bind(&record.id)
            .bind(&record.name)
            .bind(&record.arguments)
            .bind(record.max_retries as i32)
            .bind(record.retries as i32)
            .bind(execute_at.unwrap_or_else(Utc::now))
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Job>, BackendError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let Some(row) = sqlx::query(&self.select_sql())
            .bind(Utc::now())
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?
        else {
            return Ok(None);
        };
        // A decode failure returns here, dropping (and so rolling back) the
        // transaction with the row still in place.
        let record = decode_row(&row)?;
        let job = self.serializer.deserialize(&record)?;
        sqlx::query(&self.delete_sql())
            .bind(&record.id)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        tx.commit().await.map_err(storage)?;
        Ok(Some(job))
    }
}

fn decode_row(row: &sqlx::postgres::PgRow) -> Result<SerializedJob, BackendError> {
    Ok(SerializedJob {
        id: row.try_get("id").map_err(storage)?,
        name: row.try_get("name").map_err(storage)?,
        arguments: row.try_get("arguments").map_err(storage)?,
        max_retries: non_negative(row.try_get("max_retries").map_err(storage)?, "max_retries")?,
        retries: non_negative(row.try_get("retries").map_err(storage)?, "retries")?,
    })
}

fn non_negative(value: i32, column: &str) -> Result<u32, BackendError> {
    u32::try_from(value)
        .map_err(|_| BackendError::Malformed(format!("negative {column}: {value}")))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn queue(schema: QueueSchema) -> PgQueue {
        PgQueue::with_schema(
            PgPool::connect_lazy("postgres://localhost/unused").unwrap(),
            schema,
        )
    }

    #[tokio::test]
    async fn sql_targets_the_configured_names() {
        let queue = queue(QueueSchema {
            table: "my_jobs".to_owned(),
            execute_at: "due_at".to_owned(),
            ..Default::default()
        });
        assert!(queue.enqueue_sql().starts_with("INSERT INTO \"my_jobs\""));
        assert!(queue.select_sql().contains("WHERE \"due_at\" <= $1"));
        assert!(queue.delete_sql().starts_with("DELETE FROM \"my_jobs\""));
    }

    #[tokio::test]
    async fn dequeue_takes_the_most_overdue_row_with_a_lock() {
        let sql = queue(QueueSchema::default()).select_sql();
        assert!(sql.contains("\"execute_at\" <= $1"));
        assert!(sql.contains("ORDER BY \"execute_at\""));
        assert!(sql.contains("LIMIT 1 FOR UPDATE"));
    }

    #[test]
    fn negative_counters_are_malformed() {
        assert_matches!(non_negative(-1, "retries"), Err(BackendError::Malformed(_)));
        assert_eq!(non_negative(3, "retries").unwrap(), 3);
    }
}

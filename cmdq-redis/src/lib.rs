//! Redis implementations of cmdq's storage seams.
//!
//! [`RedisQueue`] keeps pending jobs in a list plus a sorted set of delayed
//! jobs, and [`RedisTimeKeeper`] keeps schedule last-run times as plain
//! Unix-timestamp keys updated through a set-if-changed script. Both work
//! over a [`redis::aio::ConnectionManager`], which reconnects on its own.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cmdq::job::Job;
use cmdq::queue::Queue;
use cmdq::serializer::{JobSerializer, SerializedJob};
use cmdq::timekeeper::TimeKeeper;
use cmdq::BackendError;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};

fn storage(err: RedisError) -> BackendError {
    BackendError::Storage(Box::new(err))
}

/// Moves at most one due entry from the delayed sorted set to the ready
/// list. Runs as a script so no other client can observe the entry in both
/// places or in neither.
const PROMOTE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #due == 1 then
    redis.call('ZREM', KEYS[2], due[1])
    redis.call('RPUSH', KEYS[1], due[1])
end
return #due
"#;

/// Stores the proposed last-run time only when it differs from the stored
/// one, reporting which happened.
const KEEP_SCRIPT: &str = r#"
local last = redis.call('GET', KEYS[1])
if last == ARGV[1] then
    return 0
end
redis.call('SET', KEYS[1], ARGV[1])
return 1
"#;

/// A queue kept in a Redis list named after the queue, with delayed jobs
/// parked in a `<name>:delayed` sorted set scored by their due time.
///
/// Dequeue first promotes one due delayed entry, then pops the head of the
/// list. An entry that cannot be decoded is moved to `<name>:dead` so it
/// stops wedging the queue, and the failure is surfaced to the caller.
#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
    name: String,
    serializer: JobSerializer,
}

impl RedisQueue {
    pub async fn from_url(redis_url: &str, name: impl Into<String>) -> Result<Self, BackendError> {
        let client = Client::open(redis_url).map_err(storage)?;
        let conn = ConnectionManager::new(client).await.map_err(storage)?;
        Ok(Self::new(conn, name))
    }

    pub fn new(conn: ConnectionManager, name: impl Into<String>) -> Self {
        Self {
            conn,
            name: name.into(),
            serializer: JobSerializer::new(),
        }
    }

    fn delayed_key(&self) -> String {
        format!("{}:delayed", self.name)
    }

    fn dead_key(&self) -> String {
        format!("{}:dead", self.name)
    }

    async fn promote_one_due_entry(&self) -> Result<(), BackendError> {
        let mut conn = self.conn.clone();
        let _promoted: i32 = Script::new(PROMOTE_SCRIPT)
            .key(&self.name)
            .key(self.delayed_key())
            .arg(Utc::now().timestamp())
            .invoke_async(&mut conn)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn decode(&self, payload: &str) -> Result<Job, BackendError> {
        let job = serde_json::from_str::<SerializedJob>(payload)
            .map_err(BackendError::from)
            .and_then(|record| self.serializer.deserialize(&record));
        if let Err(err) = &job {
            tracing::error!(?err, queue = %self.name, "undecodable queue entry moved to the dead list: {err}");
            let mut conn = self.conn.clone();
            conn.rpush::<_, _, ()>(self.dead_key(), payload)
                .await
                .map_err(storage)?;
        }
        job
    }
}

#[async_trait]
impl Queue for RedisQueue {
    async fn enqueue(
        &self,
        job: &Job,
        execute_at: Option<DateTime<Utc>>,
    ) -> Result<(), BackendError> {
        let payload = serde_json::to_string(&self.serializer.serialize(job)?)?;
        let mut conn = self.conn.clone();
        match execute_at.filter(|at| *at > Utc::now()) {
            Some(at) => {
                conn.zadd::<_, _, _, ()>(self.delayed_key(), payload, at.timestamp())
                    .await
                    .map_err(storage)?;
            }
            None => {
                conn.rpush::<_, _, ()>(&self.name, payload)
                    .await
                    .map_err(storage)?;
            }
        }
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Job>, BackendError> {
        self.promote_one_due_entry().await?;
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.lpop(&self.name, None).await.map_err(storage)?;
        match payload {
            Some(payload) => Ok(Some(self.decode(&payload).await?)),
            None => Ok(None),
        }
    }
}

/// Keeps schedule last-run times as `<prefix>:<key>` string keys holding a
/// Unix timestamp, swapped with set-if-changed semantics.
#[derive(Clone)]
pub struct RedisTimeKeeper {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisTimeKeeper {
    pub async fn from_url(
        redis_url: &str,
        prefix: impl Into<String>,
    ) -> Result<Self, BackendError> {
        let client = Client::open(redis_url).map_err(storage)?;
        let conn = ConnectionManager::new(client).await.map_err(storage)?;
        Ok(Self::new(conn, prefix))
    }

    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
        }
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

#[async_trait]
impl TimeKeeper for RedisTimeKeeper {
    async fn last_ran_time(&self, key: &str) -> Result<Option<DateTime<Utc>>, BackendError> {
        let mut conn = self.conn.clone();
        let stored: Option<String> = conn.get(self.storage_key(key)).await.map_err(storage)?;
        stored
            .map(|stored| {
                stored
                    .parse::<i64>()
                    .ok()
                    .and_then(|timestamp| DateTime::from_timestamp(timestamp, 0))
                    .ok_or_else(|| {
                        BackendError::Malformed(format!("bad stored run time {stored:?}"))
                    })
            })
            .transpose()
    }

    async fn attempt_to_keep_run_time(
        &self,
        key: &str,
        run_time: DateTime<Utc>,
    ) -> Result<bool, BackendError> {
        let mut conn = self.conn.clone();
        let kept: i32 = Script::new(KEEP_SCRIPT)
            .key(self.storage_key(key))
            .arg(run_time.timestamp().to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(storage)?;
        Ok(kept == 1)
    }
}

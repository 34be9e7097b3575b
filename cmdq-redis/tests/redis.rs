//! Integration tests against a live Redis, pointed at by `REDIS_URL`.
//!
//! Run with `cargo test -- --ignored` once the server is up.

use assert_matches::assert_matches;
use chrono::{TimeDelta, Utc};
use cmdq::job::Job;
use cmdq::queue::Queue;
use cmdq::timekeeper::TimeKeeper;
use cmdq::BackendError;
use cmdq_redis::{RedisQueue, RedisTimeKeeper};
use redis::AsyncCommands;

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_owned())
}

fn fresh_name(stem: &str) -> String {
    format!("cmdq-it:{stem}:{}", Utc::now().timestamp_micros())
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn enqueued_jobs_come_back_in_order() {
    let queue = RedisQueue::from_url(&redis_url(), fresh_name("order")).await.unwrap();
    let first = Job::new("echo", vec!["1".to_owned()], 0);
    let second = Job::new("echo", vec!["2".to_owned()], 2);

    queue.enqueue(&first, None).await.unwrap();
    queue.enqueue(&second, None).await.unwrap();

    assert_eq!(queue.dequeue().await.unwrap().unwrap(), first);
    assert_eq!(queue.dequeue().await.unwrap().unwrap(), second);
    assert!(queue.dequeue().await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn delayed_jobs_are_promoted_once_due() {
    let queue = RedisQueue::from_url(&redis_url(), fresh_name("delayed")).await.unwrap();
    let job = Job::new("echo", vec![], 0);

    queue
        .enqueue(&job, Some(Utc::now() + TimeDelta::hours(1)))
        .await
        .unwrap();
    assert!(queue.dequeue().await.unwrap().is_none());

    let overdue = RedisQueue::from_url(&redis_url(), fresh_name("overdue")).await.unwrap();
    overdue
        .enqueue(&job, Some(Utc::now() - TimeDelta::seconds(2)))
        .await
        .unwrap();
    assert_eq!(overdue.dequeue().await.unwrap().unwrap(), job);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires a running Redis"]
async fn one_eligible_job_goes_to_exactly_one_dequeuer() {
    let queue = RedisQueue::from_url(&redis_url(), fresh_name("race")).await.unwrap();
    let job = Job::new("echo", vec![], 0);
    queue.enqueue(&job, None).await.unwrap();

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        })
        .collect();
    let mut winners = 0;
    for attempt in attempts {
        if attempt.await.unwrap().unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn undecodable_entries_go_to_the_dead_list() {
    let name = fresh_name("dead");
    let queue = RedisQueue::from_url(&redis_url(), name.clone()).await.unwrap();

    let client = redis::Client::open(redis_url()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    conn.rpush::<_, _, ()>(&name, "not a job").await.unwrap();

    assert_matches!(queue.dequeue().await, Err(BackendError::EncodeDecode(_)));
    let dead: Vec<String> = conn.lrange(format!("{name}:dead"), 0, -1).await.unwrap();
    assert_eq!(dead, ["not a job".to_owned()]);
    // The queue itself is unwedged.
    assert!(queue.dequeue().await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn keeping_the_same_run_time_twice_fails_the_second_attempt() {
    let keeper = RedisTimeKeeper::from_url(&redis_url(), fresh_name("keeper")).await.unwrap();
    let run_time = chrono::DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap();

    assert_eq!(keeper.last_ran_time("tick").await.unwrap(), None);
    assert!(keeper.attempt_to_keep_run_time("tick", run_time).await.unwrap());
    assert!(!keeper.attempt_to_keep_run_time("tick", run_time).await.unwrap());
    assert_eq!(keeper.last_ran_time("tick").await.unwrap(), Some(run_time));

    let next = run_time + TimeDelta::seconds(60);
    assert!(keeper.attempt_to_keep_run_time("tick", next).await.unwrap());
    assert_eq!(keeper.last_ran_time("tick").await.unwrap(), Some(next));
}

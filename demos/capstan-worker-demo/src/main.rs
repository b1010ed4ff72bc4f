//! # Capstan Worker Demo
//!
//! Wires two workers to the in-memory backend from `capstan-testing` and
//! walks a handful of jobs through the queue: a plain success, a job that
//! fails until it's discarded, and one cancelled mid-flight by `pkill`. No
//! database, no adapters — just `capstan-core` plus its in-memory fakes.

use anyhow::Result;
use async_trait::async_trait;
use capstan_core::{Config, Instance, Job, JobOutcome, JobStore, NewJob, QueueConfig, Worker, WorkerRegistry};
use capstan_testing::{InMemoryJobStore, InMemoryPeerStore, LocalNotifier};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

struct SendEmail;

#[async_trait]
impl Worker for SendEmail {
    async fn perform(&self, job: &Job) -> JobOutcome {
        let to = job.args.get("to").and_then(Value::as_str).unwrap_or("unknown");
        println!("[SendEmail] delivering to {to} (attempt {})", job.attempt);
        JobOutcome::Complete
    }
}

/// Fails every attempt, so a job routed here demonstrates the
/// retry-then-discard path (§4.1).
struct FlakyWebhook;

#[async_trait]
impl Worker for FlakyWebhook {
    async fn perform(&self, job: &Job) -> JobOutcome {
        println!("[FlakyWebhook] attempt {} failing on purpose", job.attempt);
        JobOutcome::Error {
            reason: "connection refused".to_string(),
        }
    }

    fn backoff(&self, _attempt: i32) -> Duration {
        // Keep the demo snappy; production workers would rely on the
        // default exponential backoff (§4.3 point 5).
        Duration::from_millis(50)
    }
}

/// Sleeps long enough for the demo to `pkill` it mid-flight.
struct SlowReport;

#[async_trait]
impl Worker for SlowReport {
    async fn perform(&self, _job: &Job) -> JobOutcome {
        tokio::time::sleep(Duration::from_secs(5)).await;
        JobOutcome::Complete
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let job_store = Arc::new(InMemoryJobStore::new());
    let peer_store = Arc::new(InMemoryPeerStore::new());
    let notifier = Arc::new(LocalNotifier::new());

    let mut workers = WorkerRegistry::new();
    workers.register("SendEmail", Arc::new(SendEmail));
    workers.register("FlakyWebhook", Arc::new(FlakyWebhook));
    workers.register("SlowReport", Arc::new(SlowReport));

    let config = Config::new("demo", "node-1")
        .with_queue(QueueConfig::new("default", 5))
        .with_queue(QueueConfig::new("reports", 1));

    let instance = Instance::start(config, job_store.clone(), peer_store, notifier, Arc::new(workers))?;

    job_store
        .insert(NewJob::new(
            "default",
            "SendEmail",
            serde_json::json!({"to": "ada@example.com"}),
        ))
        .await?;

    let flaky = job_store
        .insert(
            NewJob::new("default", "FlakyWebhook", Value::Object(Default::default())).with_max_attempts(2),
        )
        .await?;

    let slow = job_store
        .insert(NewJob::new("reports", "SlowReport", Value::Object(Default::default())))
        .await?;

    if let Some(producer) = instance.producer("default") {
        producer.try_dispatch().await;
    }
    if let Some(producer) = instance.producer("reports") {
        producer.try_dispatch().await;
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    if let Some(producer) = instance.producer("reports") {
        println!("[demo] pkilling the slow report job mid-flight");
        producer.pkill(slow.id).await;
    }

    // Give the flaky webhook time to exhaust its two attempts and discard.
    tokio::time::sleep(Duration::from_millis(300)).await;

    for job in [flaky.id, slow.id] {
        if let Some(job) = job_store.get(job) {
            println!("job {} -> {} ({} attempt(s), {} error(s))", job.id, job.state, job.attempt, job.errors.len());
        }
    }

    instance.shutdown().await;
    Ok(())
}

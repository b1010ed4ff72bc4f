//! [`InMemoryJobStore`]: a `JobStore` fake backed by a `Mutex<HashMap>`,
//! used by `capstan-core`'s own component tests and by application code
//! exercising its workers without a database.
//!
//! It implements the same ordering and transition rules as
//! `capstan-postgres::PgJobStore` — `(priority, scheduled_at, id)` claim
//! order, `errors` appended not overwritten, idempotent `cancel` — so a
//! test written against this store exercises the same semantics a
//! Postgres-backed run would.

use async_trait::async_trait;
use capstan_core::{CapstanError, ErrorEntry, Job, JobState, NewJob, PeerOutcome, QueueSnapshot, StagedJob, Transition};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct InMemoryJobStore {
    next_id: AtomicI64,
    jobs: Mutex<HashMap<i64, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Insert a job directly, bypassing `scheduled_at`-vs-`now` state
    /// assignment, for fixtures that want full control of the seeded row
    /// (e.g. pre-claimed or pre-failed jobs).
    pub fn seed(&self, job: Job) -> i64 {
        let id = job.id;
        self.jobs.lock().unwrap().insert(id, job);
        id
    }

    pub fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// A point-in-time clone of every row, for assertions.
    pub fn all(&self) -> Vec<Job> {
        self.jobs.lock().unwrap().values().cloned().collect()
    }

    pub fn get(&self, id: i64) -> Option<Job> {
        self.jobs.lock().unwrap().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl capstan_core::JobStore for InMemoryJobStore {
    async fn insert(&self, new_job: NewJob) -> Result<Job, CapstanError> {
        let id = self.next_id();
        let state = if new_job.scheduled_at <= Utc::now() {
            JobState::Available
        } else {
            JobState::Scheduled
        };
        let job = Job {
            id,
            state,
            queue: new_job.queue,
            worker: new_job.worker,
            args: new_job.args,
            meta: new_job.meta,
            tags: new_job.tags,
            attempt: 0,
            max_attempts: new_job.max_attempts,
            priority: new_job.priority,
            errors: vec![],
            attempted_by: vec![],
            inserted_at: Utc::now(),
            scheduled_at: new_job.scheduled_at,
            attempted_at: None,
            completed_at: None,
            cancelled_at: None,
            discarded_at: None,
        };
        self.jobs.lock().unwrap().insert(id, job.clone());
        Ok(job)
    }

    async fn claim(&self, queue: &str, demand: usize, node: &str) -> Result<Vec<Job>, CapstanError> {
        if demand == 0 {
            return Ok(Vec::new());
        }
        let now = Utc::now();
        let mut jobs = self.jobs.lock().unwrap();

        let mut candidates: Vec<i64> = jobs
            .values()
            .filter(|j| j.queue == queue && j.state == JobState::Available && j.scheduled_at <= now)
            .map(|j| j.id)
            .collect();
        // §4.1 claim ordering: (priority, scheduled_at, id) ascending.
        candidates.sort_by(|a, b| {
            let ja = &jobs[a];
            let jb = &jobs[b];
            ja.priority
                .cmp(&jb.priority)
                .then(ja.scheduled_at.cmp(&jb.scheduled_at))
                .then(ja.id.cmp(&jb.id))
        });

        let mut claimed = Vec::new();
        for id in candidates.into_iter().take(demand) {
            let job = jobs.get_mut(&id).unwrap();
            job.state = JobState::Executing;
            job.attempt += 1;
            job.attempted_at = Some(now);
            job.attempted_by.push(node.to_string());
            claimed.push(job.clone());
        }
        Ok(claimed)
    }

    async fn stage(&self, limit: usize) -> Result<Vec<StagedJob>, CapstanError> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().unwrap();

        let mut due: Vec<i64> = jobs
            .values()
            .filter(|j| matches!(j.state, JobState::Scheduled | JobState::Retryable) && j.scheduled_at <= now)
            .map(|j| j.id)
            .collect();
        due.sort();
        due.truncate(limit);

        let mut staged = Vec::with_capacity(due.len());
        for id in due {
            let job = jobs.get_mut(&id).unwrap();
            job.state = JobState::Available;
            staged.push(StagedJob {
                id: job.id,
                queue: job.queue.clone(),
                worker: job.worker.clone(),
            });
        }
        Ok(staged)
    }

    async fn finalize(&self, id: i64, transition: Transition) -> Result<Job, CapstanError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| CapstanError::TransientStorageError(format!("no such job: {id}")))?;
        let now = Utc::now();
        match transition {
            Transition::Complete => {
                job.state = JobState::Completed;
                job.completed_at = Some(now);
            }
            Transition::Retry { scheduled_at, error } => {
                job.state = JobState::Retryable;
                job.scheduled_at = scheduled_at;
                job.errors.push(ErrorEntry {
                    attempt: job.attempt,
                    at: now,
                    error,
                });
            }
            Transition::Discard { error } => {
                job.state = JobState::Discarded;
                job.discarded_at = Some(now);
                job.errors.push(ErrorEntry {
                    attempt: job.attempt,
                    at: now,
                    error,
                });
            }
            Transition::Cancel { reason } => {
                job.state = JobState::Cancelled;
                job.cancelled_at = Some(now);
                job.errors.push(ErrorEntry {
                    attempt: job.attempt,
                    at: now,
                    error: reason,
                });
            }
            Transition::Snooze { scheduled_at } => {
                job.state = JobState::Scheduled;
                job.scheduled_at = scheduled_at;
                job.max_attempts += 1;
            }
        }
        Ok(job.clone())
    }

    async fn cancel(&self, id: i64) -> Result<Job, CapstanError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| CapstanError::TransientStorageError(format!("no such job: {id}")))?;
        if !job.state.is_terminal() {
            job.state = JobState::Cancelled;
            job.cancelled_at = Some(Utc::now());
        }
        Ok(job.clone())
    }

    async fn retry(&self, id: i64) -> Result<Job, CapstanError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| CapstanError::TransientStorageError(format!("no such job: {id}")))?;
        if job.attempt >= job.max_attempts {
            job.max_attempts = job.attempt + 1;
        }
        job.state = JobState::Available;
        Ok(job.clone())
    }

    async fn fetch_job(&self, id: i64) -> Result<Option<Job>, CapstanError> {
        Ok(self.jobs.lock().unwrap().get(&id).cloned())
    }
}

/// Build a [`QueueSnapshot`] for assertions that don't go through a live
/// `Producer`, mirroring the shape `check_queue` (§6) returns.
pub fn snapshot(queue: &str, node: &str, limit: usize, paused: bool, running: Vec<i64>) -> QueueSnapshot {
    QueueSnapshot {
        queue: queue.to_string(),
        node: node.to_string(),
        limit,
        paused,
        running,
        started_at: Utc::now(),
    }
}

/// A [`capstan_core::PeerStore`] outcome shortcut for fixtures that don't
/// exercise real election, e.g. an `Instance` test that wants this node to
/// always be the leader.
pub fn always_leader() -> PeerOutcome {
    PeerOutcome::Leader
}

#[cfg(test)]
mod tests {
    use super::*;
    use capstan_core::JobStore;
    use serde_json::Value;

    fn new_job(queue: &str, priority: i32) -> NewJob {
        NewJob::new(queue, "Noop", Value::Object(Default::default())).with_priority(priority)
    }

    #[tokio::test]
    async fn claim_orders_by_priority_then_scheduled_at_then_id() {
        let store = InMemoryJobStore::new();
        let low = store.insert(new_job("alpha", 5)).await.unwrap();
        let high = store.insert(new_job("alpha", 0)).await.unwrap();
        let mid = store.insert(new_job("alpha", 5)).await.unwrap();

        let claimed = store.claim("alpha", 10, "node-a").await.unwrap();
        let ids: Vec<i64> = claimed.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![high.id, low.id, mid.id]);
    }

    #[tokio::test]
    async fn claim_respects_demand_and_leaves_remainder_available() {
        let store = InMemoryJobStore::new();
        store.insert(new_job("alpha", 0)).await.unwrap();
        store.insert(new_job("alpha", 0)).await.unwrap();

        let claimed = store.claim("alpha", 1, "node-a").await.unwrap();
        assert_eq!(claimed.len(), 1);

        let remaining = store.all().into_iter().filter(|j| j.state == JobState::Available).count();
        assert_eq!(remaining, 1);
    }

    #[tokio::test]
    async fn cancel_is_idempotent_on_a_terminal_job() {
        let store = InMemoryJobStore::new();
        let job = store.insert(new_job("alpha", 0)).await.unwrap();
        let claimed = store.claim("alpha", 1, "node-a").await.unwrap();
        assert_eq!(claimed[0].id, job.id);
        store.cancel(job.id).await.unwrap();
        let second = store.cancel(job.id).await.unwrap();
        assert_eq!(second.state, JobState::Cancelled);
    }

    #[tokio::test]
    async fn retry_raises_saturated_max_attempts() {
        let store = InMemoryJobStore::new();
        let job = store
            .insert(NewJob::new("alpha", "Noop", Value::Object(Default::default())).with_max_attempts(1))
            .await
            .unwrap();
        let claimed = store.claim("alpha", 1, "node-a").await.unwrap();
        assert_eq!(claimed[0].attempt, 1);
        store
            .finalize(job.id, Transition::Discard { error: "boom".into() })
            .await
            .unwrap();

        let retried = store.retry(job.id).await.unwrap();
        assert_eq!(retried.state, JobState::Available);
        assert!(retried.max_attempts > 1);
    }

    #[tokio::test]
    async fn finalize_appends_errors_rather_than_overwriting() {
        let store = InMemoryJobStore::new();
        let job = store
            .insert(NewJob::new("alpha", "Noop", Value::Object(Default::default())).with_max_attempts(5))
            .await
            .unwrap();
        store.claim("alpha", 1, "node-a").await.unwrap();
        store
            .finalize(
                job.id,
                Transition::Retry {
                    scheduled_at: Utc::now(),
                    error: "first".into(),
                },
            )
            .await
            .unwrap();
        store.retry(job.id).await.unwrap();
        store.claim("alpha", 1, "node-a").await.unwrap();
        let after = store
            .finalize(
                job.id,
                Transition::Retry {
                    scheduled_at: Utc::now(),
                    error: "second".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(after.errors.len(), 2);
        assert_eq!(after.errors[0].error, "first");
        assert_eq!(after.errors[1].error, "second");
    }
}

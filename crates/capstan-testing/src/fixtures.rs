//! Small builders for constructing [`capstan_core::Job`]/[`capstan_core::NewJob`]
//! values directly, for tests that want a specific row shape (a given
//! state, attempt count, or error history) without going through a full
//! insert-then-claim-then-finalize sequence.

use capstan_core::{Job, JobState, NewJob};
use chrono::Utc;
use serde_json::Value;

/// A `NewJob` with every field at a sane default, for tests that don't
/// care about the specifics.
pub fn new_job(queue: &str, worker: &str) -> NewJob {
    NewJob::new(queue, worker, Value::Object(Default::default()))
}

/// A fully-populated [`Job`] in `Available` state, ready to hand to
/// [`crate::job_store::InMemoryJobStore::seed`] — useful when a test needs
/// to control `id`/`attempt`/`errors` directly rather than going through
/// `insert`.
pub fn available_job(id: i64, queue: &str, worker: &str) -> Job {
    Job {
        id,
        state: JobState::Available,
        queue: queue.to_string(),
        worker: worker.to_string(),
        args: Value::Object(Default::default()),
        meta: Value::Object(Default::default()),
        tags: vec![],
        attempt: 0,
        max_attempts: 20,
        priority: 0,
        errors: vec![],
        attempted_by: vec![],
        inserted_at: Utc::now(),
        scheduled_at: Utc::now(),
        attempted_at: None,
        completed_at: None,
        cancelled_at: None,
        discarded_at: None,
    }
}

/// An `Executing` job, as if already claimed by `node`, for tests that
/// exercise finalization (`finalize`/`cancel`) without going through
/// `claim` first.
pub fn executing_job(id: i64, queue: &str, worker: &str, node: &str) -> Job {
    Job {
        state: JobState::Executing,
        attempt: 1,
        attempted_at: Some(Utc::now()),
        attempted_by: vec![node.to_string()],
        ..available_job(id, queue, worker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_job_satisfies_its_own_invariants() {
        assert!(available_job(1, "alpha", "Noop").invariants_hold());
    }

    #[test]
    fn executing_job_carries_the_claiming_node() {
        let job = executing_job(1, "alpha", "Noop", "node-a");
        assert_eq!(job.state, JobState::Executing);
        assert_eq!(job.attempted_by, vec!["node-a".to_string()]);
    }
}
